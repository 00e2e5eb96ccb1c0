/*!
 * Column header classification for chargemaster files
 *
 * This module is the only place that knows how column headers encode
 * meaning. A header is either a scalar column naming one canonical field,
 * a pivot column of the form `standard_charge|<payer>|<plan>|<charge_type>`,
 * or unrecognized. Mappers classify the header row once per file into a
 * `ColumnLayout` and look columns up from there.
 */

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_CODE_SLOTS, MAX_MODIFIERS, PIVOT_DELIMITER, PIVOT_METRIC, PIVOT_SEGMENTS};
use crate::data_types::ChargeType;

/// Canonical field named by a scalar column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    Description,
    /// `code|<n>`, 1-based slot
    Code(u8),
    /// `code|<n>|type`, 1-based slot
    CodeType(u8),
    /// Delimited list of modifiers in one cell
    Modifiers,
    /// `modifier<n>`, 1-based slot
    Modifier(u8),
    Setting,
    BillingClass,
    RevenueCenter,
    DrugUnitOfMeasurement,
    DrugTypeOfMeasurement,
    GenericNotes,
    PayerNotes,
    PayerName,
    PlanName,
    ChargeType,
    Amount,
    /// Bare `standard_charge`: negotiated dollars unless a `charge_type` column says otherwise
    StandardCharge,
    Currency,
    EffectiveDate,
    ExpiresDate,
    Methodology,
    /// Payer-less charge column such as `standard_charge|gross`
    HospitalCharge(ChargeType),
}

/// A payer/plan pivot column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PivotColumn {
    pub payer: String,
    pub plan: String,
    pub charge_type: ChargeType,
    /// The charge type token exactly as written in the header
    pub raw_charge_type: String,
}

/// Classification of one header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnClass {
    Scalar { field: ScalarField },
    Pivot { column: PivotColumn },
    Unrecognized { header: String },
}

impl ColumnClass {
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, ColumnClass::Unrecognized { .. })
    }
}

/// Stateless header classifier
pub struct ColumnPatternParser;

impl ColumnPatternParser {
    /// Classify one raw header string
    pub fn classify(header: &str) -> ColumnClass {
        let key = Self::normalize_key(header);

        if let Some(field) = Self::scalar_field(&key) {
            return ColumnClass::Scalar { field };
        }

        if let Some(column) = Self::pivot_column(header) {
            return ColumnClass::Pivot { column };
        }

        ColumnClass::Unrecognized { header: header.to_string() }
    }

    /// Matching key: BOM stripped, trimmed, lower-cased, whitespace runs collapsed to `_`
    pub fn normalize_key(header: &str) -> String {
        header
            .trim_start_matches('\u{feff}')
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase()
    }

    fn scalar_field(key: &str) -> Option<ScalarField> {
        let field = match key {
            "description" => ScalarField::Description,
            "code" | "billing_code" => ScalarField::Code(1),
            "code_type" | "code|type" | "billing_code_type" => ScalarField::CodeType(1),
            "modifiers" => ScalarField::Modifiers,
            "setting" => ScalarField::Setting,
            "billing_class" => ScalarField::BillingClass,
            "revenue_center" | "revenue_code" => ScalarField::RevenueCenter,
            "drug_unit_of_measurement" => ScalarField::DrugUnitOfMeasurement,
            "drug_type_of_measurement" => ScalarField::DrugTypeOfMeasurement,
            "additional_generic_notes" | "notes" => ScalarField::GenericNotes,
            "additional_payer_notes" => ScalarField::PayerNotes,
            "payer_name" => ScalarField::PayerName,
            "plan_name" => ScalarField::PlanName,
            "charge_type" => ScalarField::ChargeType,
            "amount" => ScalarField::Amount,
            "standard_charge" => ScalarField::StandardCharge,
            "currency" => ScalarField::Currency,
            "effective_date" => ScalarField::EffectiveDate,
            "expires_date" | "expiration_date" => ScalarField::ExpiresDate,
            "standard_charge|methodology" | "standard_charge|contracting_method" => ScalarField::Methodology,
            "estimated_amount" => ScalarField::HospitalCharge(ChargeType::Estimated),
            _ => return Self::numbered_scalar(key).or_else(|| Self::hospital_charge(key)),
        };
        Some(field)
    }

    fn numbered_scalar(key: &str) -> Option<ScalarField> {
        let segments: Vec<&str> = key.split(PIVOT_DELIMITER).collect();
        match segments.as_slice() {
            ["code", n] => Self::slot(n, MAX_CODE_SLOTS).map(ScalarField::Code),
            ["code", n, "type"] => Self::slot(n, MAX_CODE_SLOTS).map(ScalarField::CodeType),
            ["modifier", n] => Self::slot(n, MAX_MODIFIERS).map(ScalarField::Modifier),
            [single] => {
                let rest = single.strip_prefix("modifier")?;
                Self::slot(rest.trim_start_matches('_'), MAX_MODIFIERS).map(ScalarField::Modifier)
            }
            _ => None,
        }
    }

    fn hospital_charge(key: &str) -> Option<ScalarField> {
        let (metric, token) = key.split_once(PIVOT_DELIMITER)?;
        if metric != PIVOT_METRIC || token.contains(PIVOT_DELIMITER) {
            return None;
        }
        ChargeType::parse(token).map(ScalarField::HospitalCharge)
    }

    fn slot(raw: &str, max: usize) -> Option<u8> {
        let n: usize = raw.parse().ok()?;
        if (1..=max).contains(&n) {
            u8::try_from(n).ok()
        } else {
            None
        }
    }

    fn pivot_column(header: &str) -> Option<PivotColumn> {
        let trimmed = header.trim_start_matches('\u{feff}').trim();
        let segments: Vec<&str> = trimmed.split(PIVOT_DELIMITER).map(str::trim).collect();
        if segments.len() != PIVOT_SEGMENTS {
            return None;
        }

        if !segments[0].eq_ignore_ascii_case(PIVOT_METRIC) {
            return None;
        }

        let (payer, plan, token) = (segments[1], segments[2], segments[3]);
        if payer.is_empty() || plan.is_empty() || token.is_empty() {
            return None;
        }

        Some(PivotColumn {
            payer: payer.to_string(),
            plan: plan.to_string(),
            charge_type: ChargeType::parse(token).unwrap_or(ChargeType::Other),
            raw_charge_type: token.to_string(),
        })
    }
}

/// Classified header row of one file, computed once per run
#[derive(Debug, Clone)]
pub struct ColumnLayout {
    headers: Vec<String>,
    classes: Vec<ColumnClass>,
}

impl ColumnLayout {
    pub fn classify<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers: Vec<String> = headers.into_iter().map(|h| h.as_ref().to_string()).collect();
        let classes = headers.iter().map(|h| ColumnPatternParser::classify(h)).collect();
        Self { headers, classes }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// `(index, header, class)` for every column in file order
    pub fn columns(&self) -> impl Iterator<Item = (usize, &str, &ColumnClass)> {
        self.headers
            .iter()
            .zip(&self.classes)
            .enumerate()
            .map(|(i, (h, c))| (i, h.as_str(), c))
    }

    /// Index of the first column classified as `field`
    pub fn index_of(&self, field: ScalarField) -> Option<usize> {
        self.classes
            .iter()
            .position(|c| matches!(c, ColumnClass::Scalar { field: f } if *f == field))
    }

    pub fn has(&self, field: ScalarField) -> bool {
        self.index_of(field).is_some()
    }

    /// Pivot columns with their indices, in file order
    pub fn pivots(&self) -> impl Iterator<Item = (usize, &PivotColumn)> {
        self.classes.iter().enumerate().filter_map(|(i, c)| match c {
            ColumnClass::Pivot { column } => Some((i, column)),
            _ => None,
        })
    }

    /// Payer-less charge columns with their indices, in file order
    pub fn hospital_charges(&self) -> impl Iterator<Item = (usize, ChargeType)> + '_ {
        self.classes.iter().enumerate().filter_map(|(i, c)| match c {
            ColumnClass::Scalar { field: ScalarField::HospitalCharge(kind) } => Some((i, *kind)),
            _ => None,
        })
    }

    /// Verbatim unrecognized headers in file order, without duplicates
    pub fn unrecognized(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for class in &self.classes {
            if let ColumnClass::Unrecognized { header } = class {
                if !seen.contains(header) {
                    seen.push(header.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pivot(header: &str) -> PivotColumn {
        match ColumnPatternParser::classify(header) {
            ColumnClass::Pivot { column } => column,
            other => panic!("expected pivot for {header}, got {other:?}"),
        }
    }

    #[test]
    fn test_pivot_preserves_payer_and_plan_case() {
        let column = pivot("standard_charge|Aetna|PPO-Gold|negotiated_dollar");
        assert_eq!(column.payer, "Aetna");
        assert_eq!(column.plan, "PPO-Gold");
        assert_eq!(column.charge_type, ChargeType::NegotiatedDollar);
    }

    #[test]
    fn test_metric_token_is_case_insensitive() {
        let column = pivot("Standard_Charge|Blue Cross|HMO|NEGOTIATED_PERCENTAGE");
        assert_eq!(column.payer, "Blue Cross");
        assert_eq!(column.charge_type, ChargeType::NegotiatedPercentage);
    }

    #[test]
    fn test_unknown_charge_token_is_other() {
        let column = pivot("standard_charge|Cigna|Open Access|negotiated_algorithm");
        assert_eq!(column.charge_type, ChargeType::Other);
        assert_eq!(column.raw_charge_type, "negotiated_algorithm");
    }

    #[test]
    fn test_short_headers_are_never_partial_matches() {
        for header in ["standard_charge|Aetna|PPO", "standard_charge|Aetna", "foo|bar|baz"] {
            assert_eq!(
                ColumnPatternParser::classify(header),
                ColumnClass::Unrecognized { header: header.to_string() }
            );
        }
    }

    #[test]
    fn test_extra_segments_and_blank_payer_unrecognized() {
        assert!(ColumnPatternParser::classify("standard_charge|A|B|negotiated_dollar|x").is_unrecognized());
        assert!(ColumnPatternParser::classify("standard_charge||B|negotiated_dollar").is_unrecognized());
        assert!(ColumnPatternParser::classify("additional_payer_notes|A|B|C").is_unrecognized());
    }

    #[test]
    fn test_scalar_columns() {
        let cases = [
            ("Description", ScalarField::Description),
            ("code|1", ScalarField::Code(1)),
            ("CODE|3|TYPE", ScalarField::CodeType(3)),
            ("modifier2", ScalarField::Modifier(2)),
            ("modifier|4", ScalarField::Modifier(4)),
            ("Payer Name", ScalarField::PayerName),
            ("standard_charge|gross", ScalarField::HospitalCharge(ChargeType::Gross)),
            ("standard_charge|discounted_cash", ScalarField::HospitalCharge(ChargeType::DiscountedCash)),
            ("standard_charge|min", ScalarField::HospitalCharge(ChargeType::Minimum)),
            ("standard_charge|methodology", ScalarField::Methodology),
            ("\u{feff}description", ScalarField::Description),
        ];
        for (header, field) in cases {
            assert_eq!(ColumnPatternParser::classify(header), ColumnClass::Scalar { field }, "{header}");
        }
        assert!(ColumnPatternParser::classify("code|5").is_unrecognized());
        assert!(ColumnPatternParser::classify("modifier9").is_unrecognized());
    }

    #[test]
    fn test_layout_unrecognized_in_order_without_duplicates() {
        let layout = ColumnLayout::classify([
            "description",
            "mystery",
            "standard_charge|Aetna|PPO|negotiated_dollar",
            "other thing",
            "mystery",
        ]);
        assert_eq!(layout.unrecognized(), vec!["mystery".to_string(), "other thing".to_string()]);
        assert_eq!(layout.pivots().count(), 1);
        assert_eq!(layout.index_of(ScalarField::Description), Some(0));
    }
}
