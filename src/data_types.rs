/*!
 * Canonical data types for normalized chargemaster records
 *
 * Every mapper produces the same shapes: one `HospitalTransparencyFile` per
 * source, owning its `Item`s and the `StandardCharge`s that reference them.
 * Values are validated when they are constructed and never mutated after
 * the file is emitted.
 */

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CURRENCY, MAX_AMOUNT_SCALE, MAX_MODIFIERS};
use crate::{ChargemasterError, Result};

/// Hospital-level metadata for one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HospitalMetadata {
    hospital_id: String,
    name: Option<String>,
    license_number: Option<String>,
    address: Option<String>,
    location: Option<String>,
    last_updated_on: Option<NaiveDate>,
    version: Option<String>,
}

impl HospitalMetadata {
    /// Create metadata for a hospital id, which must be non-empty
    pub fn new(hospital_id: impl Into<String>) -> Result<Self> {
        let hospital_id = hospital_id.into().trim().to_string();
        if hospital_id.is_empty() {
            return Err(ChargemasterError::configuration(
                "hospital_id must not be empty",
                Some("Every catalog record needs the stable external hospital id"),
            ));
        }

        Ok(Self {
            hospital_id,
            name: None,
            license_number: None,
            address: None,
            location: None,
            last_updated_on: None,
            version: None,
        })
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_license_number(mut self, license_number: Option<String>) -> Self {
        self.license_number = license_number;
        self
    }

    pub fn with_address(mut self, address: Option<String>) -> Self {
        self.address = address;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_last_updated_on(mut self, date: Option<NaiveDate>) -> Self {
        self.last_updated_on = date;
        self
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn hospital_id(&self) -> &str {
        &self.hospital_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn license_number(&self) -> Option<&str> {
        self.license_number.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn last_updated_on(&self) -> Option<NaiveDate> {
        self.last_updated_on
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// Kind of a priced fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeType {
    Gross,
    DiscountedCash,
    NegotiatedDollar,
    NegotiatedPercentage,
    Estimated,
    /// De-identified minimum negotiated charge
    Minimum,
    /// De-identified maximum negotiated charge
    Maximum,
    /// Token not in the vocabulary; the raw token is kept in the charge notes
    Other,
}

impl ChargeType {
    /// All kinds with a defined meaning (excludes `Other`)
    pub const KNOWN: [ChargeType; 7] = [
        ChargeType::Gross,
        ChargeType::DiscountedCash,
        ChargeType::NegotiatedDollar,
        ChargeType::NegotiatedPercentage,
        ChargeType::Estimated,
        ChargeType::Minimum,
        ChargeType::Maximum,
    ];

    /// Parse a charge kind token, case-insensitively.
    ///
    /// Returns `None` for tokens outside the vocabulary; callers decide
    /// whether that maps to `Other` or drops the value.
    pub fn parse(token: &str) -> Option<Self> {
        let normalized: String = token
            .trim()
            .chars()
            .map(|c| if c == '-' || c.is_whitespace() { '_' } else { c.to_ascii_lowercase() })
            .collect();

        match normalized.as_str() {
            "gross" | "gross_charge" => Some(ChargeType::Gross),
            "discounted_cash" | "cash" | "discounted_cash_price" => Some(ChargeType::DiscountedCash),
            "negotiated_dollar" | "negotiated" | "negotiated_rate" | "dollar" => Some(ChargeType::NegotiatedDollar),
            "negotiated_percentage" | "negotiated_percent" | "percentage" | "percent" => {
                Some(ChargeType::NegotiatedPercentage)
            }
            "estimated" | "estimated_amount" | "estimate" => Some(ChargeType::Estimated),
            "min" | "minimum" | "deidentified_min" => Some(ChargeType::Minimum),
            "max" | "maximum" | "deidentified_max" => Some(ChargeType::Maximum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeType::Gross => "gross",
            ChargeType::DiscountedCash => "discounted_cash",
            ChargeType::NegotiatedDollar => "negotiated_dollar",
            ChargeType::NegotiatedPercentage => "negotiated_percentage",
            ChargeType::Estimated => "estimated",
            ChargeType::Minimum => "minimum",
            ChargeType::Maximum => "maximum",
            ChargeType::Other => "other",
        }
    }

    /// Whether the kind is quoted per payer/plan rather than hospital-wide
    pub fn is_payer_specific(&self) -> bool {
        matches!(
            self,
            ChargeType::NegotiatedDollar
                | ChargeType::NegotiatedPercentage
                | ChargeType::Estimated
                | ChargeType::Other
        )
    }
}

impl std::fmt::Display for ChargeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A billing code with its code system (CPT, HCPCS, MS-DRG, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingCode {
    pub code: String,
    pub code_type: Option<String>,
}

/// Position of an `Item` inside its `HospitalTransparencyFile`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub usize);

/// A procedure or service identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    description: Option<String>,
    code: Option<String>,
    code_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    alternate_codes: Vec<BillingCode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    modifiers: Vec<String>,
    setting: Option<String>,
    revenue_center: Option<String>,
    billing_class: Option<String>,
    drug_unit_of_measurement: Option<String>,
    drug_type_of_measurement: Option<String>,
}

impl Item {
    pub fn builder() -> ItemBuilder {
        ItemBuilder::default()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn code_type(&self) -> Option<&str> {
        self.code_type.as_deref()
    }

    pub fn alternate_codes(&self) -> &[BillingCode] {
        &self.alternate_codes
    }

    pub fn modifiers(&self) -> &[String] {
        &self.modifiers
    }

    pub fn setting(&self) -> Option<&str> {
        self.setting.as_deref()
    }

    pub fn revenue_center(&self) -> Option<&str> {
        self.revenue_center.as_deref()
    }

    pub fn billing_class(&self) -> Option<&str> {
        self.billing_class.as_deref()
    }

    pub fn drug_unit_of_measurement(&self) -> Option<&str> {
        self.drug_unit_of_measurement.as_deref()
    }

    pub fn drug_type_of_measurement(&self) -> Option<&str> {
        self.drug_type_of_measurement.as_deref()
    }

    /// The `(code, code_type, modifiers, description)` identity of this item
    pub fn identity(&self) -> (Option<&str>, Option<&str>, &[String], Option<&str>) {
        (self.code(), self.code_type(), self.modifiers(), self.description())
    }

    /// Two items with the same identity describe the same procedure
    pub fn same_item(&self, other: &Item) -> bool {
        self.identity() == other.identity()
    }
}

/// Builder validating an `Item` at construction
#[derive(Debug, Clone, Default)]
pub struct ItemBuilder {
    description: Option<String>,
    code: Option<BillingCode>,
    alternate_codes: Vec<BillingCode>,
    modifiers: Vec<String>,
    setting: Option<String>,
    revenue_center: Option<String>,
    billing_class: Option<String>,
    drug_unit_of_measurement: Option<String>,
    drug_type_of_measurement: Option<String>,
}

impl ItemBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a billing code; the first one becomes the item's primary code
    pub fn code(mut self, code: impl Into<String>, code_type: Option<String>) -> Self {
        let code = BillingCode { code: code.into(), code_type };
        if self.code.is_none() {
            self.code = Some(code);
        } else {
            self.alternate_codes.push(code);
        }
        self
    }

    /// Add a modifier, ignoring exact duplicates
    pub fn modifier(mut self, modifier: impl Into<String>) -> Self {
        let modifier = modifier.into();
        if !self.modifiers.contains(&modifier) {
            self.modifiers.push(modifier);
        }
        self
    }

    pub fn setting(mut self, setting: impl Into<String>) -> Self {
        self.setting = Some(setting.into());
        self
    }

    pub fn revenue_center(mut self, revenue_center: impl Into<String>) -> Self {
        self.revenue_center = Some(revenue_center.into());
        self
    }

    pub fn billing_class(mut self, billing_class: impl Into<String>) -> Self {
        self.billing_class = Some(billing_class.into());
        self
    }

    pub fn drug_unit_of_measurement(mut self, unit: impl Into<String>) -> Self {
        self.drug_unit_of_measurement = Some(unit.into());
        self
    }

    pub fn drug_type_of_measurement(mut self, unit_type: impl Into<String>) -> Self {
        self.drug_type_of_measurement = Some(unit_type.into());
        self
    }

    /// Whether the builder has a code or a description to identify the item
    pub fn has_identity(&self) -> bool {
        self.code.is_some() || self.description.is_some()
    }

    pub fn build(self) -> Result<Item> {
        if !self.has_identity() {
            return Err(ChargemasterError::DataValidation {
                message: "Item has neither a code nor a description".to_string(),
                field: Some("description".to_string()),
                value: None,
                context: Default::default(),
            });
        }

        if self.modifiers.len() > MAX_MODIFIERS {
            return Err(ChargemasterError::invalid_value(
                "modifiers",
                &self.modifiers.join("|"),
                format!("At most {} modifiers are allowed, found {}", MAX_MODIFIERS, self.modifiers.len()),
            ));
        }

        let (code, code_type) = match self.code {
            Some(BillingCode { code, code_type }) => (Some(code), code_type),
            None => (None, None),
        };

        Ok(Item {
            description: self.description,
            code,
            code_type,
            alternate_codes: self.alternate_codes,
            modifiers: self.modifiers,
            setting: self.setting,
            revenue_center: self.revenue_center,
            billing_class: self.billing_class,
            drug_unit_of_measurement: self.drug_unit_of_measurement,
            drug_type_of_measurement: self.drug_type_of_measurement,
        })
    }
}

/// One priced fact about an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardCharge {
    item: ItemId,
    charge_type: ChargeType,
    payer_name: Option<String>,
    plan_name: Option<String>,
    amount: Option<Decimal>,
    currency: String,
    effective_date: Option<NaiveDate>,
    expires_date: Option<NaiveDate>,
    methodology: Option<String>,
    notes: Option<String>,
}

impl StandardCharge {
    /// Create a charge; the amount must be non-negative with at most four fractional digits
    pub fn new(item: ItemId, charge_type: ChargeType, amount: Option<Decimal>) -> Result<Self> {
        let amount = amount.map(validate_amount).transpose()?;

        Ok(Self {
            item,
            charge_type,
            payer_name: None,
            plan_name: None,
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            effective_date: None,
            expires_date: None,
            methodology: None,
            notes: None,
        })
    }

    /// Point the charge at another item
    pub fn for_item(mut self, item: ItemId) -> Self {
        self.item = item;
        self
    }

    pub fn with_payer(mut self, payer_name: Option<String>, plan_name: Option<String>) -> Self {
        self.payer_name = payer_name;
        self.plan_name = plan_name;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Set the validity window; an expiry before the effective date is rejected
    pub fn with_dates(mut self, effective: Option<NaiveDate>, expires: Option<NaiveDate>) -> Result<Self> {
        if let (Some(from), Some(to)) = (effective, expires) {
            if to < from {
                return Err(ChargemasterError::invalid_value(
                    "expires_date",
                    &to.to_string(),
                    format!("Expiry {} precedes effective date {}", to, from),
                ));
            }
        }
        self.effective_date = effective;
        self.expires_date = expires;
        Ok(self)
    }

    pub fn with_methodology(mut self, methodology: Option<String>) -> Self {
        self.methodology = methodology;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn item(&self) -> ItemId {
        self.item
    }

    pub fn charge_type(&self) -> ChargeType {
        self.charge_type
    }

    pub fn payer_name(&self) -> Option<&str> {
        self.payer_name.as_deref()
    }

    pub fn plan_name(&self) -> Option<&str> {
        self.plan_name.as_deref()
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.effective_date
    }

    pub fn expires_date(&self) -> Option<NaiveDate> {
        self.expires_date
    }

    pub fn methodology(&self) -> Option<&str> {
        self.methodology.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ChargemasterError::invalid_value(
            "amount",
            &amount.to_string(),
            "Amount must not be negative",
        ));
    }

    if amount.scale() <= MAX_AMOUNT_SCALE {
        return Ok(amount);
    }

    let normalized = amount.normalize();
    if normalized.scale() <= MAX_AMOUNT_SCALE {
        Ok(normalized)
    } else {
        Err(ChargemasterError::invalid_value(
            "amount",
            &amount.to_string(),
            format!("Amount has more than {} fractional digits", MAX_AMOUNT_SCALE),
        ))
    }
}

/// Root canonical artifact for one hospital source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HospitalTransparencyFile {
    metadata: HospitalMetadata,
    source_file: String,
    mapper_id: String,
    items: Vec<Item>,
    standard_charges: Vec<StandardCharge>,
}

impl HospitalTransparencyFile {
    /// Assemble a file, checking that every charge references an owned item
    pub fn new(
        metadata: HospitalMetadata,
        source_file: impl Into<String>,
        mapper_id: impl Into<String>,
        items: Vec<Item>,
        standard_charges: Vec<StandardCharge>,
    ) -> Result<Self> {
        if let Some(dangling) = standard_charges.iter().find(|c| c.item.0 >= items.len()) {
            return Err(ChargemasterError::schema(format!(
                "Charge references item {} but the file only has {} items",
                dangling.item.0,
                items.len()
            )));
        }

        Ok(Self {
            metadata,
            source_file: source_file.into(),
            mapper_id: mapper_id.into(),
            items,
            standard_charges,
        })
    }

    pub fn metadata(&self) -> &HospitalMetadata {
        &self.metadata
    }

    pub fn hospital_id(&self) -> &str {
        self.metadata.hospital_id()
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn mapper_id(&self) -> &str {
        &self.mapper_id
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn standard_charges(&self) -> &[StandardCharge] {
        &self.standard_charges
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id.0)
    }

    /// Iterate charges together with the item each one prices
    pub fn charges_with_items(&self) -> impl Iterator<Item = (&Item, &StandardCharge)> {
        self.standard_charges
            .iter()
            .filter_map(move |charge| self.item(charge.item).map(|item| (item, charge)))
    }

    pub fn len(&self) -> usize {
        self.standard_charges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.standard_charges.is_empty()
    }
}

/// Result of coercing one amount cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountCell {
    /// Blank cell: no rate for this payer/procedure
    Empty,
    /// Text that is not a number (e.g. "N/A", "see contract")
    NotNumeric,
    /// A number the canonical model cannot hold (negative, too precise)
    OutOfRange,
    Value(Decimal),
}

/// Coerce a raw amount cell.
///
/// Accepts a leading `$`, a trailing `%` and `,` thousands separators.
pub fn parse_amount_cell(raw: &str) -> AmountCell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return AmountCell::Empty;
    }

    let cleaned: String = trimmed
        .trim_start_matches('$')
        .trim_end_matches('%')
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect();

    let parsed = Decimal::from_str(&cleaned).or_else(|_| Decimal::from_scientific(&cleaned));
    match parsed {
        Ok(value) => match validate_amount(value) {
            Ok(value) => AmountCell::Value(value),
            Err(_) => AmountCell::OutOfRange,
        },
        Err(_) => AmountCell::NotNumeric,
    }
}

/// Parse an optional date cell in `YYYY-MM-DD`, `MM/DD/YYYY` or `YYYYMMDD` form
pub fn parse_date_cell(field: &str, raw: &str) -> Result<Option<NaiveDate>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .map(Some)
        .ok_or_else(|| ChargemasterError::date_parse(field, trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_hospital_id_required() {
        assert!(HospitalMetadata::new("  ").is_err());
        assert_eq!(HospitalMetadata::new(" nwh ").unwrap().hospital_id(), "nwh");
    }

    #[test]
    fn test_charge_type_tokens() {
        assert_eq!(ChargeType::parse("Negotiated_Dollar"), Some(ChargeType::NegotiatedDollar));
        assert_eq!(ChargeType::parse("discounted-cash"), Some(ChargeType::DiscountedCash));
        assert_eq!(ChargeType::parse("min"), Some(ChargeType::Minimum));
        assert_eq!(ChargeType::parse("negotiated_algorithm"), None);
        assert!(!ChargeType::Gross.is_payer_specific());
        assert!(ChargeType::Other.is_payer_specific());
    }

    #[test]
    fn test_item_requires_identity() {
        assert!(Item::builder().setting("inpatient").build().is_err());
        let item = Item::builder().code("99213", Some("CPT".into())).build().unwrap();
        assert_eq!(item.code(), Some("99213"));
        assert_eq!(item.code_type(), Some("CPT"));
    }

    #[test]
    fn test_item_alternate_codes_and_modifier_limit() {
        let item = Item::builder()
            .description("Office visit")
            .code("99213", Some("CPT".into()))
            .code("0510", Some("RC".into()))
            .build()
            .unwrap();
        assert_eq!(item.alternate_codes().len(), 1);

        let too_many = ["25", "59", "76", "77", "91"]
            .iter()
            .fold(Item::builder().description("x"), |b, m| b.modifier(*m));
        assert!(too_many.build().is_err());
    }

    #[test]
    fn test_same_item_ignores_setting() {
        let a = Item::builder().description("MRI").code("70551", None).setting("outpatient").build().unwrap();
        let b = Item::builder().description("MRI").code("70551", None).setting("inpatient").build().unwrap();
        assert!(a.same_item(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_amount_validation() {
        assert!(StandardCharge::new(ItemId(0), ChargeType::Gross, Some(dec("-1"))).is_err());
        assert!(StandardCharge::new(ItemId(0), ChargeType::Gross, Some(dec("1.23456"))).is_err());
        let trailing = StandardCharge::new(ItemId(0), ChargeType::Gross, Some(dec("1.500000"))).unwrap();
        assert_eq!(trailing.amount(), Some(dec("1.5")));
        let none = StandardCharge::new(ItemId(0), ChargeType::Gross, None).unwrap();
        assert_eq!(none.amount(), None);
        assert_eq!(none.currency(), "USD");
    }

    #[test]
    fn test_parse_amount_cell() {
        assert_eq!(parse_amount_cell(""), AmountCell::Empty);
        assert_eq!(parse_amount_cell("  "), AmountCell::Empty);
        assert_eq!(parse_amount_cell("N/A"), AmountCell::NotNumeric);
        assert_eq!(parse_amount_cell("$1,234.50"), AmountCell::Value(dec("1234.50")));
        assert_eq!(parse_amount_cell("45%"), AmountCell::Value(dec("45")));
        assert_eq!(parse_amount_cell("-3"), AmountCell::OutOfRange);
        assert_eq!(parse_amount_cell("0.123456"), AmountCell::OutOfRange);
    }

    #[test]
    fn test_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(parse_date_cell("effective_date", "2024-07-01").unwrap(), Some(date));
        assert_eq!(parse_date_cell("effective_date", "07/01/2024").unwrap(), Some(date));
        assert_eq!(parse_date_cell("effective_date", "").unwrap(), None);
        assert!(parse_date_cell("effective_date", "July").is_err());

        let charge = StandardCharge::new(ItemId(0), ChargeType::NegotiatedDollar, None).unwrap();
        let earlier = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(charge.with_dates(Some(date), Some(earlier)).is_err());
    }

    #[test]
    fn test_file_rejects_dangling_item_reference() {
        let metadata = HospitalMetadata::new("h1").unwrap();
        let charge = StandardCharge::new(ItemId(3), ChargeType::Gross, None).unwrap();
        assert!(HospitalTransparencyFile::new(metadata, "f.csv", "wide", vec![], vec![charge]).is_err());
    }
}
