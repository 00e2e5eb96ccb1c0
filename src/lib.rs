/*!
 * # Chargemaster Normalization Library
 *
 * Converts hospital price transparency files (wide payer-pivoted CSVs or
 * tall CMS-style CSVs) into one canonical record set per hospital, and
 * reports every column or row it could not interpret.
 *
 * ## Features
 *
 * - **Mapper registry**: each source names its `mapper_id`; callers never branch on format
 * - **Bounded memory**: files are streamed in row batches, output is identical for any batch size
 * - **Diagnostics**: unrecognized headers and rejected rows go to a sidecar report
 * - **Typed model**: `Item`, `StandardCharge` and `HospitalMetadata` validate on construction
 *
 * ## Quick Start
 *
 * ```no_run
 * use chargemaster::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let source = SourceRecord::new("nwh", "data/raw/nwh/2024-07-01/standard_charges.csv", "nwh_wide");
 *
 * let normalizer = Normalizer::new(NormalizeConfig::load());
 * let outcome = normalizer.normalize(&source)?;
 *
 * println!("{}: {} charges ({})", source.hospital_id, outcome.file.len(), outcome.status());
 * outcome.summary.print_summary();
 *
 * write_outcome(&outcome, "data/canonical", true, false)?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Custom Mappers
 *
 * A hospital-specific mapper implements `SourceMapper` and is registered
 * under its own id:
 *
 * ```no_run
 * # use chargemaster::prelude::*;
 * # fn main() -> Result<()> {
 * let normalizer = Normalizer::builder()
 *     .mapper(WideFormatMapper::named("acme_wide").with_default_header_row(0))
 *     .config(ConfigBuilder::new().batch_size(50_000).build())
 *     .build()?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Column Headers
 *
 * Scalar headers (`description`, `code|1`, `modifier2`, `setting`, ...) name
 * item fields. Pivot headers follow `standard_charge|<payer>|<plan>|<charge_type>`.
 * Anything else is listed in the diagnostics report verbatim.
 */

// Re-export error types from root
pub use error::{ChargemasterError, ErrorCategory, ErrorContext, ExportFormat, Result};

// Public modules
pub mod catalog;
pub mod config;
pub mod data_types;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod logging;
pub mod mapper;
pub mod normalize;
pub mod outcome;
pub mod reader;
pub mod schema;
pub mod tall;
pub mod wide;

/// Prelude module for convenient imports
///
/// ```
/// use chargemaster::prelude::*;
/// ```
pub mod prelude {
    pub use crate::catalog::{CancellationToken, MapContext, SourceFormat, SourceRecord};
    pub use crate::config::{ConfigBuilder, NormalizeConfig};
    pub use crate::data_types::*;
    pub use crate::diagnostics::{DiagnosticsReport, RejectedRow};
    pub use crate::error::{ChargemasterError, ErrorCategory, Result};
    pub use crate::export::{
        read_canonical, write_diagnostics, write_outcome, ArtifactPaths, CanonicalExporter, CsvExporter,
        JsonExporter,
    };
    pub use crate::mapper::{MapperRegistry, SourceMapper};
    pub use crate::normalize::{Normalizer, NormalizerBuilder, SourceRun};
    pub use crate::outcome::{MappingOutcome, RunStatus, RunSummary};
    pub use crate::reader::{inspect_headers, ChunkedStreamEngine};
    pub use crate::schema::{ColumnClass, ColumnLayout, ColumnPatternParser, PivotColumn, ScalarField};
    pub use crate::tall::TallFormatValidator;
    pub use crate::wide::WideFormatMapper;
    pub use crate::ExportFormat;
}

/// Chargemaster format constants
pub mod constants {
    /// Data rows per batch
    pub const DEFAULT_BATCH_SIZE: usize = 250_000;

    /// Currency assumed when a source carries none
    pub const DEFAULT_CURRENCY: &str = "USD";

    /// Modifier slots per item
    pub const MAX_MODIFIERS: usize = 4;

    /// Code slots per item (`code|1` .. `code|4`)
    pub const MAX_CODE_SLOTS: usize = 4;

    /// Fractional digits an amount may carry
    pub const MAX_AMOUNT_SCALE: u32 = 4;

    /// Separator inside encoded column headers
    pub const PIVOT_DELIMITER: char = '|';

    /// Metric token that starts a pivot header
    pub const PIVOT_METRIC: &str = "standard_charge";

    /// Segments in `standard_charge|<payer>|<plan>|<charge_type>`
    pub const PIVOT_SEGMENTS: usize = 4;

    /// Wide files put hospital metadata in rows 0-1 and headers in row 2
    pub const WIDE_DEFAULT_HEADER_ROW: usize = 2;
}

/// Common queries over a canonical file
pub mod cookbook {
    use std::collections::BTreeSet;

    use crate::prelude::*;

    /// All charges quoted for one payer, matched case-insensitively
    ///
    /// # Example
    /// ```no_run
    /// # use chargemaster::prelude::*;
    /// # use chargemaster::cookbook::charges_for_payer;
    /// # fn main() -> Result<()> {
    /// let file = read_canonical("data/canonical/nwh.json")?;
    /// for (item, charge) in charges_for_payer(&file, "aetna") {
    ///     println!("{:?} {:?}", item.description(), charge.amount());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn charges_for_payer<'a>(
        file: &'a HospitalTransparencyFile,
        payer: &str,
    ) -> Vec<(&'a Item, &'a StandardCharge)> {
        file.charges_with_items()
            .filter(|(_, charge)| {
                charge
                    .payer_name()
                    .map(|p| p.eq_ignore_ascii_case(payer))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Distinct `(payer, plan)` pairs in sorted order
    pub fn payer_plans(file: &HospitalTransparencyFile) -> Vec<(String, String)> {
        file.standard_charges()
            .iter()
            .filter_map(|c| match (c.payer_name(), c.plan_name()) {
                (Some(payer), Some(plan)) => Some((payer.to_string(), plan.to_string())),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Gross charge of every item that has one, keyed by item position
    pub fn gross_charges(file: &HospitalTransparencyFile) -> Vec<(ItemId, rust_decimal::Decimal)> {
        file.standard_charges()
            .iter()
            .filter(|c| c.charge_type() == ChargeType::Gross)
            .filter_map(|c| c.amount().map(|a| (c.item(), a)))
            .collect()
    }
}
