/*!
 * Tall (one fact per row) chargemaster validation
 *
 * A tall file's columns are its contract: a file missing a required column
 * is rejected before any data row is read. Rows are then coerced into
 * canonical charges. Hospital-level kinds (gross, discounted cash, min,
 * max) repeat on every payer row of a CMS tall file and are emitted once
 * per item and amount, without a payer.
 */

use crate::catalog::MapContext;
use crate::data_types::{parse_date_cell, ChargeType, ItemId, StandardCharge};
use crate::mapper::{ChargeSink, ItemColumns, RowTransform, SourceMapper, SourceRow};
use crate::schema::{ColumnLayout, ScalarField};
use crate::{ChargemasterError, Result};

/// Columns every tall file must carry, besides an amount column
const REQUIRED_COLUMNS: [(ScalarField, &str); 3] = [
    (ScalarField::Description, "description"),
    (ScalarField::PayerName, "payer_name"),
    (ScalarField::PlanName, "plan_name"),
];

/// Mapper for tall, CMS-style CSV sources
#[derive(Debug, Clone)]
pub struct TallFormatValidator {
    id: String,
}

impl Default for TallFormatValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TallFormatValidator {
    pub fn new() -> Self {
        Self::named("tall")
    }

    pub fn named(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    /// Names of required columns the layout lacks, in a stable order
    pub fn missing_columns(layout: &ColumnLayout) -> Vec<String> {
        let mut missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|(field, _)| !layout.has(*field))
            .map(|(_, name)| name.to_string())
            .collect();

        // Only a bare `standard_charge` column has a kind to fall back on
        let has_amount = layout.has(ScalarField::Amount);
        if has_amount && !layout.has(ScalarField::ChargeType) {
            missing.push("charge_type".to_string());
        }
        let has_standard_charge = layout.has(ScalarField::StandardCharge);
        if !has_amount && !has_standard_charge && layout.hospital_charges().next().is_none() {
            missing.push("amount".to_string());
        }
        missing
    }

    /// The typed amount column and the kind used when a row names none
    fn amount_column(layout: &ColumnLayout) -> Option<(usize, Option<ChargeType>)> {
        layout
            .index_of(ScalarField::Amount)
            .map(|i| (i, None))
            .or_else(|| layout.index_of(ScalarField::StandardCharge).map(|i| (i, Some(ChargeType::NegotiatedDollar))))
    }
}

impl SourceMapper for TallFormatValidator {
    fn id(&self) -> &str {
        &self.id
    }

    fn prepare(&self, layout: &ColumnLayout, ctx: &MapContext) -> Result<Box<dyn RowTransform>> {
        let missing = Self::missing_columns(layout);
        if !missing.is_empty() {
            tracing::error!(
                hospital_id = %ctx.hospital_id(),
                missing = %missing.join(", "),
                "Tall file is missing required columns"
            );
            return Err(ChargemasterError::missing_columns(missing));
        }

        Ok(Box::new(TallTransform {
            items: ItemColumns::resolve(layout),
            payer_name: layout.index_of(ScalarField::PayerName),
            plan_name: layout.index_of(ScalarField::PlanName),
            charge_type: layout.index_of(ScalarField::ChargeType),
            amount: Self::amount_column(layout),
            charge_columns: layout.hospital_charges().collect(),
            currency: layout.index_of(ScalarField::Currency),
            effective_date: layout.index_of(ScalarField::EffectiveDate),
            expires_date: layout.index_of(ScalarField::ExpiresDate),
            methodology: layout.index_of(ScalarField::Methodology),
            generic_notes: layout.index_of(ScalarField::GenericNotes),
            payer_notes: layout.index_of(ScalarField::PayerNotes),
        }))
    }
}

struct TallTransform {
    items: ItemColumns,
    payer_name: Option<usize>,
    plan_name: Option<usize>,
    charge_type: Option<usize>,
    /// Amount column and its fallback kind
    amount: Option<(usize, Option<ChargeType>)>,
    charge_columns: Vec<(usize, ChargeType)>,
    currency: Option<usize>,
    effective_date: Option<usize>,
    expires_date: Option<usize>,
    methodology: Option<usize>,
    generic_notes: Option<usize>,
    payer_notes: Option<usize>,
}

impl TallTransform {
    /// `(charge_type, raw amount)` pairs present on this row
    fn row_amounts<'r>(&self, row: &'r SourceRow, sink: &mut ChargeSink) -> Vec<(ChargeType, &'r str)> {
        let mut amounts = Vec::new();

        if let Some((amount, fallback)) = self.amount {
            let raw = row.raw(amount);
            match (row.field(self.charge_type), fallback) {
                (Some(token), _) => match ChargeType::parse(&token) {
                    Some(kind) => amounts.push((kind, raw)),
                    None => sink.drop_unknown_charge_type(row.line, &token),
                },
                (None, Some(kind)) => amounts.push((kind, raw)),
                (None, None) if !raw.trim().is_empty() => sink.drop_unknown_charge_type(row.line, ""),
                (None, None) => {}
            }
        }

        for (index, kind) in &self.charge_columns {
            amounts.push((*kind, row.raw(*index)));
        }
        amounts
    }
}

impl RowTransform for TallTransform {
    fn map_row(&mut self, row: &SourceRow, sink: &mut ChargeSink) -> Result<()> {
        let item = match self.items.build(row)? {
            Some(item) => item,
            None => {
                if !row.is_blank() {
                    sink.skip_row_without_identity(row.line);
                }
                return Ok(());
            }
        };

        let effective = match self.effective_date {
            Some(i) => parse_date_cell("effective_date", row.raw(i))?,
            None => None,
        };
        let expires = match self.expires_date {
            Some(i) => parse_date_cell("expires_date", row.raw(i))?,
            None => None,
        };

        let payer = row.field(self.payer_name);
        let plan = row.field(self.plan_name);
        let currency = row
            .field(self.currency)
            .unwrap_or_else(|| sink.default_currency().to_string());
        let methodology = row.field(self.methodology);
        let notes = match (row.field(self.generic_notes), row.field(self.payer_notes)) {
            (Some(generic), Some(payer_notes)) => Some(format!("{}; {}", generic, payer_notes)),
            (generic, payer_notes) => generic.or(payer_notes),
        };

        let mut payer_charges = Vec::new();
        let mut hospital_charges = Vec::new();
        for (kind, raw) in self.row_amounts(row, sink) {
            let amount = match sink.amount(raw) {
                Some(amount) => amount,
                None => continue,
            };

            let charge = StandardCharge::new(ItemId(0), kind, Some(amount))?
                .with_currency(currency.clone())
                .with_dates(effective, expires)?;

            if kind.is_payer_specific() {
                payer_charges.push(
                    charge
                        .with_payer(payer.clone(), plan.clone())
                        .with_methodology(methodology.clone())
                        .with_notes(notes.clone()),
                );
            } else {
                hospital_charges.push(charge.with_notes(row.field(self.generic_notes)));
            }
        }

        if payer_charges.is_empty() && hospital_charges.is_empty() {
            return Ok(());
        }

        let item = sink.intern_item(item);
        for charge in hospital_charges {
            sink.emit_once(charge.for_item(item));
        }
        for charge in payer_charges {
            sink.emit(charge.for_item(item));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceRecord;
    use crate::config::NormalizeConfig;
    use crate::diagnostics::DiagnosticsCollector;
    use csv::StringRecord;

    fn ctx() -> MapContext {
        MapContext::new(SourceRecord::new("h1", "f.csv", "tall"), NormalizeConfig::default())
    }

    fn run(headers: &[&str], rows: &[&[&str]]) -> ChargeSink {
        let layout = ColumnLayout::classify(headers);
        let mut transform = TallFormatValidator::new().prepare(&layout, &ctx()).unwrap();
        let mut sink = ChargeSink::new(DiagnosticsCollector::new("h1", "f.csv", "tall", 10), "USD");
        let rows: Vec<SourceRow> = rows
            .iter()
            .enumerate()
            .map(|(i, r)| SourceRow { line: Some(i as u64 + 2), record: StringRecord::from(r.to_vec()) })
            .collect();
        transform.map_batch(&rows, &mut sink);
        sink
    }

    #[test]
    fn test_missing_payer_name_is_named() {
        let layout = ColumnLayout::classify(["description", "code|1", "plan_name", "charge_type", "amount"]);
        let err = TallFormatValidator::new().prepare(&layout, &ctx()).err().unwrap();
        match err {
            ChargemasterError::SchemaValidation { missing_columns, .. } => {
                assert_eq!(missing_columns, vec!["payer_name".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_amount_column_requires_charge_type() {
        let layout = ColumnLayout::classify(["description", "payer_name", "plan_name", "amount"]);
        assert_eq!(TallFormatValidator::missing_columns(&layout), vec!["charge_type".to_string()]);

        let layout = ColumnLayout::classify(["description", "payer_name", "plan_name"]);
        assert_eq!(TallFormatValidator::missing_columns(&layout), vec!["amount".to_string()]);
    }

    #[test]
    fn test_bare_standard_charge_defaults_to_negotiated_dollar() {
        let layout = ColumnLayout::classify(["description", "payer_name", "plan_name", "standard_charge"]);
        assert!(TallFormatValidator::missing_columns(&layout).is_empty());

        let sink = run(
            &["description", "code|1", "payer_name", "plan_name", "standard_charge|gross", "standard_charge"],
            &[
                &["MRI", "70551", "Aetna", "PPO", "1000", "600"],
                &["MRI", "70551", "Cigna", "HMO", "1000", ""],
            ],
        );
        let (_, charges, summary, _) = sink.into_parts();
        assert_eq!(charges.len(), 2);
        assert_eq!(summary.charges_dropped_unknown_type, 0);
        let negotiated = charges.iter().find(|c| c.charge_type() == ChargeType::NegotiatedDollar).unwrap();
        assert_eq!(negotiated.payer_name(), Some("Aetna"));
    }

    #[test]
    fn test_charge_type_column_overrides_standard_charge_default() {
        let sink = run(
            &["description", "payer_name", "plan_name", "charge_type", "standard_charge"],
            &[&["MRI", "Aetna", "PPO", "negotiated_percentage", "45"]],
        );
        let (_, charges, _, _) = sink.into_parts();
        assert_eq!(charges[0].charge_type(), ChargeType::NegotiatedPercentage);
    }

    #[test]
    fn test_rows_with_charge_type_column() {
        let sink = run(
            &["description", "code|1", "payer_name", "plan_name", "charge_type", "amount", "effective_date"],
            &[
                &["Office visit", "99213", "Aetna", "PPO", "negotiated_dollar", "120.00", "2024-01-01"],
                &["Office visit", "99213", "Cigna", "HMO", "negotiated_algorithm", "99", ""],
                &["Office visit", "99213", "Cigna", "HMO", "negotiated_percentage", "45%", ""],
            ],
        );
        let (items, charges, summary, _) = sink.into_parts();
        assert_eq!(items.len(), 1);
        assert_eq!(charges.len(), 2);
        assert_eq!(summary.charges_dropped_unknown_type, 1);
        assert_eq!(charges[0].payer_name(), Some("Aetna"));
        assert!(charges[0].effective_date().is_some());
        assert_eq!(charges[1].charge_type(), ChargeType::NegotiatedPercentage);
    }

    #[test]
    fn test_cms_tall_hospital_level_charges_emitted_once() {
        let sink = run(
            &[
                "description",
                "code|1",
                "payer_name",
                "plan_name",
                "standard_charge|gross",
                "standard_charge|negotiated_dollar",
                "standard_charge|methodology",
            ],
            &[
                &["MRI", "70551", "Aetna", "PPO", "1000", "600", "fee schedule"],
                &["MRI", "70551", "Cigna", "HMO", "1000", "650", "case rate"],
            ],
        );
        let (_, charges, _, _) = sink.into_parts();
        assert_eq!(charges.len(), 3);
        let gross: Vec<_> = charges.iter().filter(|c| c.charge_type() == ChargeType::Gross).collect();
        assert_eq!(gross.len(), 1);
        assert!(gross[0].payer_name().is_none());
        let cigna = charges.iter().find(|c| c.payer_name() == Some("Cigna")).unwrap();
        assert_eq!(cigna.methodology(), Some("case rate"));
    }

    #[test]
    fn test_expiry_before_effective_fails_row() {
        let sink = run(
            &["description", "payer_name", "plan_name", "charge_type", "amount", "effective_date", "expires_date"],
            &[&["MRI", "Aetna", "PPO", "negotiated_dollar", "10", "2024-06-01", "2024-01-01"]],
        );
        assert_eq!(sink.summary().rows_failed, 1);
        assert_eq!(sink.summary().charges_emitted, 0);
    }
}
