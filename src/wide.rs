/*!
 * Wide (payer-pivoted) chargemaster mapping
 *
 * A wide file has one row per procedure. Scalar columns describe the item;
 * every charge column (`standard_charge|gross`, or a pivot such as
 * `standard_charge|Aetna|PPO|negotiated_dollar`) contributes at most one
 * `StandardCharge` per row. Blank and non-numeric cells are a hospital
 * legitimately quoting nothing and are skipped.
 */

use crate::catalog::MapContext;
use crate::constants::WIDE_DEFAULT_HEADER_ROW;
use crate::data_types::{parse_date_cell, ChargeType, ItemId, StandardCharge};
use crate::mapper::{ChargeSink, ItemColumns, RowTransform, SourceMapper, SourceRow};
use crate::schema::{ColumnLayout, ScalarField};
use crate::Result;

/// Mapper for wide, payer-pivoted CSV sources
#[derive(Debug, Clone)]
pub struct WideFormatMapper {
    id: String,
    default_header_row: usize,
}

impl Default for WideFormatMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl WideFormatMapper {
    pub fn new() -> Self {
        Self::named("wide")
    }

    /// A wide mapper registered under another id
    pub fn named(id: &str) -> Self {
        Self {
            id: id.to_string(),
            default_header_row: WIDE_DEFAULT_HEADER_ROW,
        }
    }

    pub fn with_default_header_row(mut self, header_row: usize) -> Self {
        self.default_header_row = header_row;
        self
    }
}

impl SourceMapper for WideFormatMapper {
    fn id(&self) -> &str {
        &self.id
    }

    fn default_header_row(&self) -> usize {
        self.default_header_row
    }

    fn prepare(&self, layout: &ColumnLayout, ctx: &MapContext) -> Result<Box<dyn RowTransform>> {
        let columns: Vec<ChargeColumn> = layout
            .columns()
            .filter_map(|(index, _, _)| ChargeColumn::from_layout(layout, index))
            .collect();

        let items = ItemColumns::resolve(layout);
        if !items.has_identity_columns() {
            tracing::warn!(hospital_id = %ctx.hospital_id(), "Wide file has no description or code column");
        }
        if columns.is_empty() {
            tracing::warn!(hospital_id = %ctx.hospital_id(), "Wide file has no recognized charge columns");
        }

        Ok(Box::new(WideTransform {
            items,
            columns,
            generic_notes: layout.index_of(ScalarField::GenericNotes),
            methodology: layout.index_of(ScalarField::Methodology),
            currency: layout.index_of(ScalarField::Currency),
            effective_date: layout.index_of(ScalarField::EffectiveDate),
            expires_date: layout.index_of(ScalarField::ExpiresDate),
        }))
    }
}

/// One column that can carry a price
#[derive(Debug, Clone)]
struct ChargeColumn {
    index: usize,
    charge_type: ChargeType,
    payer: Option<String>,
    plan: Option<String>,
    /// Header token kept for charge types outside the vocabulary
    unknown_token: Option<String>,
}

impl ChargeColumn {
    fn from_layout(layout: &ColumnLayout, index: usize) -> Option<Self> {
        if let Some((_, pivot)) = layout.pivots().find(|(i, _)| *i == index) {
            return Some(Self {
                index,
                charge_type: pivot.charge_type,
                payer: Some(pivot.payer.clone()),
                plan: Some(pivot.plan.clone()),
                unknown_token: (pivot.charge_type == ChargeType::Other).then(|| pivot.raw_charge_type.clone()),
            });
        }

        layout
            .hospital_charges()
            .find(|(i, _)| *i == index)
            .map(|(_, charge_type)| Self {
                index,
                charge_type,
                payer: None,
                plan: None,
                unknown_token: None,
            })
    }
}

struct WideTransform {
    items: ItemColumns,
    columns: Vec<ChargeColumn>,
    generic_notes: Option<usize>,
    methodology: Option<usize>,
    currency: Option<usize>,
    effective_date: Option<usize>,
    expires_date: Option<usize>,
}

impl RowTransform for WideTransform {
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
        let currency = row
            .field(self.currency)
            .unwrap_or_else(|| sink.default_currency().to_string());
        let generic_notes = row.field(self.generic_notes);
        let methodology = row.field(self.methodology);

        // Validate every cell of the row before emitting any of its charges
        let mut charges = Vec::new();
        for column in &self.columns {
            let amount = match sink.amount(row.raw(column.index)) {
                Some(amount) => amount,
                None => continue,
            };

            let notes = match (&column.unknown_token, &generic_notes) {
                (Some(token), Some(notes)) => Some(format!("charge_type={}; {}", token, notes)),
                (Some(token), None) => Some(format!("charge_type={}", token)),
                (None, notes) => notes.clone(),
            };

            let charge = StandardCharge::new(ItemId(0), column.charge_type, Some(amount))?
                .with_payer(column.payer.clone(), column.plan.clone())
                .with_currency(currency.clone())
                .with_dates(effective, expires)?
                .with_methodology(if column.charge_type.is_payer_specific() { methodology.clone() } else { None })
                .with_notes(notes);
            charges.push(charge);
        }

        if charges.is_empty() {
            return Ok(());
        }

        let item = sink.intern_item(item);
        for charge in charges {
            sink.emit(charge.for_item(item));
        }
        Ok(())
    }
}
