/*!
 * Mapper contract and registry
 *
 * Every source format is handled by a `SourceMapper`. Callers resolve one by
 * the catalog's `mapper_id` and call `map_file`; they never branch on the
 * concrete mapper. A mapper contributes a per-file `RowTransform`, which the
 * chunked stream engine feeds batch by batch into a shared `ChargeSink`.
 */

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use csv::StringRecord;
use rust_decimal::Decimal;

use crate::catalog::MapContext;
use crate::data_types::{
    parse_amount_cell, AmountCell, ChargeType, Item, ItemId, StandardCharge,
};
use crate::diagnostics::DiagnosticsCollector;
use crate::outcome::{MappingOutcome, RunSummary};
use crate::reader::ChunkedStreamEngine;
use crate::schema::{ColumnLayout, ScalarField};
use crate::tall::TallFormatValidator;
use crate::wide::WideFormatMapper;
use crate::{ChargemasterError, Result};

/// Number of rejected rows logged individually per run
const LOGGED_REJECTIONS: usize = 10;

/// One physical data row of a source file
#[derive(Debug, Clone)]
pub struct SourceRow {
    /// 1-based line where the record starts
    pub line: Option<u64>,
    pub record: StringRecord,
}

impl SourceRow {
    /// Trimmed, non-empty value of a column
    pub fn field(&self, index: Option<usize>) -> Option<String> {
        index
            .and_then(|i| self.record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Raw cell text, empty when the column is absent
    pub fn raw(&self, index: usize) -> &str {
        self.record.get(index).unwrap_or("")
    }

    pub fn is_blank(&self) -> bool {
        self.record.iter().all(|f| f.trim().is_empty())
    }
}

/// Per-file transform built once the header row has been classified
pub trait RowTransform: Send {
    /// Map one data row into the sink.
    ///
    /// An `Err` marks the row as failed; the engine counts it and continues.
    fn map_row(&mut self, row: &SourceRow, sink: &mut ChargeSink) -> Result<()>;

    /// Map one batch of rows in order
    fn map_batch(&mut self, batch: &[SourceRow], sink: &mut ChargeSink) {
        for row in batch {
            if let Err(e) = self.map_row(row, sink) {
                sink.record_row_failure(row.line, &e.to_string());
            }
        }
    }
}

/// A pluggable transform for one source format
pub trait SourceMapper: Send + Sync {
    /// Registry key of this mapper
    fn id(&self) -> &str;

    /// Header row used when the catalog does not declare one
    fn default_header_row(&self) -> usize {
        0
    }

    /// Inspect the classified header row and build the row transform.
    ///
    /// Structural problems with the header row are reported here, before
    /// any data row is read.
    fn prepare(&self, layout: &ColumnLayout, ctx: &MapContext) -> Result<Box<dyn RowTransform>>;

    /// Normalize one source file into its canonical form
    fn map_file(&self, path: &Path, ctx: &MapContext) -> Result<MappingOutcome> {
        ChunkedStreamEngine::from_config(&ctx.config).run(self, path, ctx)
    }
}

/// Accumulates canonical output and counters across all batches of one run
#[derive(Debug)]
pub struct ChargeSink {
    items: Vec<Item>,
    item_ids: HashMap<Item, ItemId>,
    charges: Vec<StandardCharge>,
    hospital_level: HashSet<(ItemId, ChargeType, Option<Decimal>)>,
    summary: RunSummary,
    diagnostics: DiagnosticsCollector,
    currency: String,
}

impl ChargeSink {
    pub fn new(diagnostics: DiagnosticsCollector, currency: &str) -> Self {
        Self {
            items: Vec::new(),
            item_ids: HashMap::new(),
            charges: Vec::new(),
            hospital_level: HashSet::new(),
            summary: RunSummary::default(),
            diagnostics,
            currency: currency.to_string(),
        }
    }

    /// Currency for charges whose source does not name one
    pub fn default_currency(&self) -> &str {
        &self.currency
    }

    /// Return the id of an equal item seen earlier in this run, or add it
    pub fn intern_item(&mut self, item: Item) -> ItemId {
        if let Some(id) = self.item_ids.get(&item) {
            return *id;
        }
        let id = ItemId(self.items.len());
        self.item_ids.insert(item.clone(), id);
        self.items.push(item);
        id
    }

    pub fn emit(&mut self, charge: StandardCharge) {
        self.summary.charges_emitted += 1;
        self.charges.push(charge);
    }

    /// Emit a hospital-level charge unless the same item, kind and amount was already emitted
    pub fn emit_once(&mut self, charge: StandardCharge) -> bool {
        let key = (charge.item(), charge.charge_type(), charge.amount());
        if self.hospital_level.insert(key) {
            self.emit(charge);
            true
        } else {
            false
        }
    }

    /// Coerce an amount cell, counting cells that yield no value
    pub fn amount(&mut self, raw: &str) -> Option<Decimal> {
        match parse_amount_cell(raw) {
            AmountCell::Value(value) => Some(value),
            AmountCell::Empty | AmountCell::NotNumeric => {
                self.summary.cells_skipped += 1;
                None
            }
            AmountCell::OutOfRange => {
                self.summary.cells_rejected += 1;
                None
            }
        }
    }

    pub fn skip_row_without_identity(&mut self, line: Option<u64>) {
        self.summary.rows_skipped_no_identity += 1;
        self.reject(line, "row has neither a code nor a description");
    }

    pub fn drop_unknown_charge_type(&mut self, line: Option<u64>, token: &str) {
        self.summary.charges_dropped_unknown_type += 1;
        self.reject(line, &format!("unknown charge type '{}'", token));
    }

    pub fn record_row_failure(&mut self, line: Option<u64>, reason: &str) {
        self.record_unparsed_rows(line, 1, reason);
    }

    /// Count `lines` physical rows as failed under one rejection entry
    pub(crate) fn record_unparsed_rows(&mut self, line: Option<u64>, lines: usize, reason: &str) {
        self.summary.rows_failed += lines;
        self.reject(line, reason);
    }

    fn reject(&mut self, line: Option<u64>, reason: &str) {
        if self.diagnostics.rejected_rows_total() < LOGGED_REJECTIONS {
            tracing::warn!(line = ?line, reason = %reason, "Rejected row");
        }
        self.diagnostics.record_rejected_row(line, reason);
    }

    pub(crate) fn count_rows_read(&mut self, rows: usize) {
        self.summary.rows_read += rows;
    }

    pub(crate) fn batch_done(&mut self) {
        self.summary.batches += 1;
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn diagnostics(&self) -> &DiagnosticsCollector {
        &self.diagnostics
    }

    pub(crate) fn into_parts(self) -> (Vec<Item>, Vec<StandardCharge>, RunSummary, DiagnosticsCollector) {
        let mut summary = self.summary;
        summary.items_emitted = self.items.len();
        summary.unrecognized_headers = self.diagnostics.unrecognized_headers().len();
        (self.items, self.charges, summary, self.diagnostics)
    }
}

/// Column positions of the item identity fields, resolved once per file
#[derive(Debug, Clone, Default)]
pub struct ItemColumns {
    description: Option<usize>,
    codes: Vec<(usize, Option<usize>)>,
    modifiers: Option<usize>,
    modifier_slots: Vec<usize>,
    setting: Option<usize>,
    revenue_center: Option<usize>,
    billing_class: Option<usize>,
    drug_unit: Option<usize>,
    drug_type: Option<usize>,
}

impl ItemColumns {
    pub fn resolve(layout: &ColumnLayout) -> Self {
        let codes = (1..=crate::constants::MAX_CODE_SLOTS as u8)
            .filter_map(|n| {
                layout
                    .index_of(ScalarField::Code(n))
                    .map(|code| (code, layout.index_of(ScalarField::CodeType(n))))
            })
            .collect();

        let modifier_slots = (1..=crate::constants::MAX_MODIFIERS as u8)
            .filter_map(|n| layout.index_of(ScalarField::Modifier(n)))
            .collect();

        Self {
            description: layout.index_of(ScalarField::Description),
            codes,
            modifiers: layout.index_of(ScalarField::Modifiers),
            modifier_slots,
            setting: layout.index_of(ScalarField::Setting),
            revenue_center: layout.index_of(ScalarField::RevenueCenter),
            billing_class: layout.index_of(ScalarField::BillingClass),
            drug_unit: layout.index_of(ScalarField::DrugUnitOfMeasurement),
            drug_type: layout.index_of(ScalarField::DrugTypeOfMeasurement),
        }
    }

    /// Whether the file has any column that can identify an item
    pub fn has_identity_columns(&self) -> bool {
        self.description.is_some() || !self.codes.is_empty()
    }

    /// Build the row's item; `Ok(None)` when the row has no code or description
    pub fn build(&self, row: &SourceRow) -> Result<Option<Item>> {
        let mut builder = Item::builder();

        if let Some(description) = row.field(self.description) {
            builder = builder.description(description);
        }
        for (code, code_type) in &self.codes {
            if let Some(value) = row.field(Some(*code)) {
                builder = builder.code(value, row.field(*code_type));
            }
        }

        if !builder.has_identity() {
            return Ok(None);
        }

        if let Some(list) = row.field(self.modifiers) {
            for modifier in list.split(['|', ',', ';']).map(str::trim).filter(|m| !m.is_empty()) {
                builder = builder.modifier(modifier);
            }
        }
        for slot in &self.modifier_slots {
            if let Some(modifier) = row.field(Some(*slot)) {
                builder = builder.modifier(modifier);
            }
        }

        if let Some(setting) = row.field(self.setting) {
            builder = builder.setting(setting);
        }
        if let Some(revenue_center) = row.field(self.revenue_center) {
            builder = builder.revenue_center(revenue_center);
        }
        if let Some(billing_class) = row.field(self.billing_class) {
            builder = builder.billing_class(billing_class);
        }
        if let Some(unit) = row.field(self.drug_unit) {
            builder = builder.drug_unit_of_measurement(unit);
        }
        if let Some(unit_type) = row.field(self.drug_type) {
            builder = builder.drug_type_of_measurement(unit_type);
        }

        builder.build().map(Some)
    }
}

/// Lookup of mappers by catalog `mapper_id`
#[derive(Clone)]
pub struct MapperRegistry {
    mappers: BTreeMap<String, Arc<dyn SourceMapper>>,
}

impl std::fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperRegistry").field("ids", &self.ids()).finish()
    }
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl MapperRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { mappers: BTreeMap::new() }
    }

    /// Registry with the built-in wide and tall mappers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(WideFormatMapper::new());
        registry.register(WideFormatMapper::named("cms_wide"));
        registry.register(WideFormatMapper::named("nwh_wide").with_default_header_row(2));
        registry.register(TallFormatValidator::new());
        registry.register(TallFormatValidator::named("cms_tall"));
        registry
    }

    fn key(mapper_id: &str) -> String {
        mapper_id.trim().to_lowercase()
    }

    /// Register a mapper under its id, returning any mapper it replaces
    pub fn register<M: SourceMapper + 'static>(&mut self, mapper: M) -> Option<Arc<dyn SourceMapper>> {
        let key = Self::key(mapper.id());
        self.mappers.insert(key, Arc::new(mapper))
    }

    /// Resolve a mapper id; unknown ids are a configuration error
    pub fn resolve(&self, mapper_id: &str) -> Result<Arc<dyn SourceMapper>> {
        self.mappers
            .get(&Self::key(mapper_id))
            .cloned()
            .ok_or_else(|| ChargemasterError::mapper_not_found(mapper_id, self.ids()))
    }

    pub fn contains(&self, mapper_id: &str) -> bool {
        self.mappers.contains_key(&Self::key(mapper_id))
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.mappers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}
