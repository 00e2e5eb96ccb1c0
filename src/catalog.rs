/*!
 * Catalog input: what to normalize and how
 *
 * The catalog itself (the hospital/source manifest) lives outside this
 * crate. A `SourceRecord` is the read-only description of one source that
 * the catalog hands to the normalizer, and `MapContext` bundles it with the
 * run settings a mapper needs.
 */

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::NormalizeConfig;
use crate::{ChargemasterError, Result};

/// Physical layout of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Comma-delimited text
    #[default]
    Csv,
    /// Tab-delimited text
    Tsv,
}

impl SourceFormat {
    pub fn delimiter(&self) -> u8 {
        match self {
            SourceFormat::Csv => b',',
            SourceFormat::Tsv => b'\t',
        }
    }
}

impl FromStr for SourceFormat {
    type Err = ChargemasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "csv" | "csv_wide" | "csv_tall" | "cms_csv" | "wide_csv" | "tall_csv" => Ok(SourceFormat::Csv),
            "tsv" | "txt" => Ok(SourceFormat::Tsv),
            other => Err(ChargemasterError::configuration(
                format!("Unsupported source format '{}'", other),
                Some("Only delimited text sources (csv, tsv) can be normalized"),
            )),
        }
    }
}

/// One source as declared by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub hospital_id: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub format: SourceFormat,
    pub mapper_id: String,
    /// 0-based physical row holding the column headers; `None` uses the mapper default
    #[serde(default)]
    pub header_row: Option<usize>,
    #[serde(default)]
    pub hospital_name: Option<String>,
}

impl SourceRecord {
    pub fn new<P: AsRef<Path>>(hospital_id: &str, file_path: P, mapper_id: &str) -> Self {
        Self {
            hospital_id: hospital_id.to_string(),
            file_path: file_path.as_ref().to_path_buf(),
            format: SourceFormat::Csv,
            mapper_id: mapper_id.to_string(),
            header_row: None,
            hospital_name: None,
        }
    }

    pub fn with_header_row(mut self, header_row: usize) -> Self {
        self.header_row = Some(header_row);
        self
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_hospital_name(mut self, name: &str) -> Self {
        self.hospital_name = Some(name.to_string());
        self
    }

    /// Reject records missing a required field
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.hospital_id.trim().is_empty() {
            missing.push("hospital_id");
        }
        if self.file_path.as_os_str().is_empty() {
            missing.push("file_path");
        }
        if self.mapper_id.trim().is_empty() {
            missing.push("mapper_id");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ChargemasterError::configuration(
                format!("Catalog record is missing required fields: {}", missing.join(", ")),
                Some("Fill in the source manifest before normalizing"),
            ))
        }
    }

    /// File name used to label artifacts; never the full path
    pub fn source_file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.to_string_lossy().into_owned())
    }
}

/// Cooperative cancellation flag, checked between batches
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything a mapper needs besides the file itself
#[derive(Debug, Clone)]
pub struct MapContext {
    pub source: SourceRecord,
    pub config: NormalizeConfig,
    pub cancellation: Option<CancellationToken>,
    /// Whether this run may draw its own progress bar
    pub show_progress: bool,
}

impl MapContext {
    pub fn new(source: SourceRecord, config: NormalizeConfig) -> Self {
        let show_progress = config.enable_progress_bar;
        Self {
            source,
            config,
            cancellation: None,
            show_progress,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn hospital_id(&self) -> &str {
        self.source.hospital_id.trim()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }
}
