/*!
 * Writing canonical and diagnostics artifacts
 *
 * The canonical JSON document is the lossless hand-off to the loader; it
 * carries no timestamps, so the same input always serializes to the same
 * bytes. The flat CSV export is a convenience view with one row per charge.
 */

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::data_types::{HospitalTransparencyFile, Item, StandardCharge};
use crate::diagnostics::DiagnosticsReport;
use crate::outcome::MappingOutcome;
use crate::{ChargemasterError, ExportFormat, Result};

/// Trait for canonical file exporters
pub trait CanonicalExporter {
    /// Export one canonical file
    fn export(&self, file: &HospitalTransparencyFile, path: &Path) -> Result<()>;

    /// Get the export format
    fn format(&self) -> ExportFormat;
}

/// JSON exporter for the canonical document
#[derive(Debug, Clone)]
pub struct JsonExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self { pretty_print: true }
    }
}

impl JsonExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    /// Serialize to an in-memory buffer
    pub fn to_vec(&self, file: &HospitalTransparencyFile) -> Result<Vec<u8>> {
        let bytes = if self.pretty_print {
            serde_json::to_vec_pretty(file)?
        } else {
            serde_json::to_vec(file)?
        };
        Ok(bytes)
    }
}

impl CanonicalExporter for JsonExporter {
    fn export(&self, file: &HospitalTransparencyFile, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        if self.pretty_print {
            serde_json::to_writer_pretty(&mut writer, file)?;
        } else {
            serde_json::to_writer(&mut writer, file)?;
        }
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }
}

/// Flat CSV exporter, one row per charge with its item columns repeated
#[derive(Debug, Clone)]
pub struct CsvExporter {
    /// Whether to include headers
    pub include_headers: bool,
    /// Field delimiter
    pub delimiter: u8,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self {
            include_headers: true,
            delimiter: b',',
        }
    }
}

impl CsvExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }

    fn write_to<W: Write>(&self, file: &HospitalTransparencyFile, out: W) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.include_headers)
            .from_writer(out);

        for (item, charge) in file.charges_with_items() {
            writer.serialize(FlatChargeRow::new(file.hospital_id(), item, charge))?;
        }

        writer.flush().map_err(|e| ChargemasterError::Export {
            message: format!("Failed to flush CSV output: {}", e),
            format: ExportFormat::Csv,
            suggestion: None,
        })?;
        Ok(())
    }
}

impl CanonicalExporter for CsvExporter {
    fn export(&self, file: &HospitalTransparencyFile, path: &Path) -> Result<()> {
        self.write_to(file, BufWriter::new(File::create(path)?))
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

#[derive(Serialize)]
struct FlatChargeRow<'a> {
    hospital_id: &'a str,
    description: Option<&'a str>,
    code: Option<&'a str>,
    code_type: Option<&'a str>,
    modifiers: String,
    setting: Option<&'a str>,
    revenue_center: Option<&'a str>,
    billing_class: Option<&'a str>,
    charge_type: &'static str,
    payer_name: Option<&'a str>,
    plan_name: Option<&'a str>,
    amount: Option<String>,
    currency: &'a str,
    effective_date: Option<String>,
    expires_date: Option<String>,
    methodology: Option<&'a str>,
    notes: Option<&'a str>,
}

impl<'a> FlatChargeRow<'a> {
    fn new(hospital_id: &'a str, item: &'a Item, charge: &'a StandardCharge) -> Self {
        Self {
            hospital_id,
            description: item.description(),
            code: item.code(),
            code_type: item.code_type(),
            modifiers: item.modifiers().join("|"),
            setting: item.setting(),
            revenue_center: item.revenue_center(),
            billing_class: item.billing_class(),
            charge_type: charge.charge_type().as_str(),
            payer_name: charge.payer_name(),
            plan_name: charge.plan_name(),
            amount: charge.amount().map(|a| a.to_string()),
            currency: charge.currency(),
            effective_date: charge.effective_date().map(|d| d.to_string()),
            expires_date: charge.expires_date().map(|d| d.to_string()),
            methodology: charge.methodology(),
            notes: charge.notes(),
        }
    }
}

/// Read a canonical JSON document back
pub fn read_canonical<P: AsRef<Path>>(path: P) -> Result<HospitalTransparencyFile> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ChargemasterError::file_not_found_with_suggestion(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write a diagnostics sidecar document
pub fn write_diagnostics<P: AsRef<Path>>(report: &DiagnosticsReport, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Artifact locations for one hospital inside an output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub canonical: PathBuf,
    pub flat_csv: PathBuf,
    pub diagnostics: PathBuf,
}

impl ArtifactPaths {
    pub fn for_hospital<P: AsRef<Path>>(dir: P, hospital_id: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            canonical: dir.join(format!("{}.json", hospital_id)),
            flat_csv: dir.join(format!("{}.csv", hospital_id)),
            diagnostics: dir.join(format!("{}__diagnostics.json", hospital_id)),
        }
    }
}

/// Write the canonical document, and the diagnostics sidecar when there is one.
///
/// A stale sidecar from an earlier run is removed when this run has none.
pub fn write_outcome<P: AsRef<Path>>(
    outcome: &MappingOutcome,
    dir: P,
    pretty: bool,
    flat_csv: bool,
) -> Result<ArtifactPaths> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let paths = ArtifactPaths::for_hospital(dir, outcome.file.hospital_id());

    JsonExporter::new().with_pretty_print(pretty).export(&outcome.file, &paths.canonical)?;
    if flat_csv {
        CsvExporter::new().export(&outcome.file, &paths.flat_csv)?;
    }

    match &outcome.diagnostics {
        Some(report) => write_diagnostics(report, &paths.diagnostics)?,
        None if paths.diagnostics.exists() => std::fs::remove_file(&paths.diagnostics)?,
        None => {}
    }

    tracing::debug!(path = %paths.canonical.display(), "Wrote canonical document");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::{ChargeType, HospitalMetadata, ItemId};
    use crate::diagnostics::DiagnosticsCollector;
    use crate::outcome::RunSummary;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn sample() -> HospitalTransparencyFile {
        let item = Item::builder()
            .description("Office visit")
            .code("99213", Some("CPT".into()))
            .modifier("25")
            .build()
            .unwrap();
        let charge = StandardCharge::new(
            ItemId(0),
            ChargeType::NegotiatedDollar,
            Some(Decimal::from_str("1234.50").unwrap()),
        )
        .unwrap()
        .with_payer(Some("Aetna".into()), Some("PPO-Gold".into()));
        let metadata = HospitalMetadata::new("h1").unwrap().with_name(Some("General".into()));
        HospitalTransparencyFile::new(metadata, "f.csv", "wide", vec![item], vec![charge]).unwrap()
    }

    #[test]
    fn test_json_round_trip_keeps_amount_scale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h1.json");
        JsonExporter::new().export(&sample(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"1234.50\""));
        assert_eq!(read_canonical(&path).unwrap(), sample());
    }

    #[test]
    fn test_flat_csv() {
        let mut out = Vec::new();
        CsvExporter::new().write_to(&sample(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("hospital_id,description,code"));
        assert_eq!(
            lines.next().unwrap(),
            "h1,Office visit,99213,CPT,25,,,,negotiated_dollar,Aetna,PPO-Gold,1234.50,USD,,,,"
        );
    }

    #[test]
    fn test_write_outcome_removes_stale_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::for_hospital(dir.path(), "h1");
        std::fs::write(&paths.diagnostics, "{}").unwrap();

        let outcome = MappingOutcome { file: sample(), summary: RunSummary::default(), diagnostics: None };
        let written = write_outcome(&outcome, dir.path(), false, true).unwrap();
        assert_eq!(written, paths);
        assert!(paths.canonical.exists());
        assert!(paths.flat_csv.exists());
        assert!(!paths.diagnostics.exists());
    }

    #[test]
    fn test_write_outcome_keeps_sidecar_for_rejected_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = DiagnosticsCollector::new("h1", "f.csv", "wide", 10);
        collector.record_rejected_row(Some(7), "expected 4 fields, found 1");

        let outcome = MappingOutcome { file: sample(), summary: RunSummary::default(), diagnostics: collector.finish() };
        let paths = write_outcome(&outcome, dir.path(), false, false).unwrap();

        let text = std::fs::read_to_string(&paths.diagnostics).unwrap();
        let report: DiagnosticsReport = serde_json::from_str(&text).unwrap();
        assert!(report.unrecognized_headers.is_empty());
        assert_eq!(report.rejected_rows_total, 1);
        assert_eq!(report.rejected_rows[0].line, Some(7));
    }
}
