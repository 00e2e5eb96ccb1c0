/*!
 * Error handling for chargemaster normalization runs
 *
 * Provides detailed error types with context, suggestions, and a coarse
 * category used by callers to decide whether a failure is worth retrying.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use serde::{Serialize, Deserialize};

use crate::diagnostics::DiagnosticsReport;

/// Chargemaster library result type
pub type Result<T> = std::result::Result<T, ChargemasterError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum ChargemasterError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<u64>,
        context: ErrorContext,
    },

    /// Source file does not exist
    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        suggestion: String,
    },

    /// No mapper registered under the declared id
    #[error("No mapper registered for mapper_id '{mapper_id}'")]
    MapperNotFound {
        mapper_id: String,
        known: Vec<String>,
    },

    /// Configuration errors (bad catalog record, out-of-range settings)
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// The file declares a different hospital than the catalog
    #[error("Hospital id mismatch: catalog declares '{expected}', file declares '{found}'")]
    HospitalMismatch {
        expected: String,
        found: String,
    },

    /// Structural errors: the file cannot be interpreted as a whole
    #[error("Schema validation error: {message}")]
    SchemaValidation {
        message: String,
        missing_columns: Vec<String>,
        diagnostics: Option<Box<DiagnosticsReport>>,
    },

    /// Per-row or per-value validation errors
    #[error("Data validation error: {message}")]
    DataValidation {
        message: String,
        field: Option<String>,
        value: Option<String>,
        context: ErrorContext,
    },

    /// Too many rows could not be parsed
    #[error("Row failure rate {rate:.4} exceeds threshold {threshold:.4} ({failed} of {read} rows failed)")]
    FailureRateExceeded {
        failed: usize,
        read: usize,
        rate: f64,
        threshold: f64,
    },

    /// The caller cancelled the run between batches
    #[error("Run cancelled after {rows_read} rows")]
    Cancelled {
        rows_read: usize,
    },

    /// Export errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        format: ExportFormat,
        suggestion: Option<String>,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<u64>,
    pub column_name: Option<String>,
    pub hospital_id: Option<String>,
}

/// Coarse error taxonomy of a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Unknown mapper, bad catalog record, bad settings
    Configuration,
    /// The file as a whole cannot be normalized
    Structural,
    /// A single row or value could not be interpreted
    RowLevel,
    /// Row failures exceeded the configured ratio
    RateExceeded,
    /// Reading or writing failed
    Io,
    /// The caller asked to stop
    Cancelled,
}

/// Export format for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "JSON"),
            ExportFormat::Csv => write!(f, "CSV"),
        }
    }
}

impl ChargemasterError {
    /// Create a file not found error with helpful suggestion
    pub fn file_not_found_with_suggestion(path: PathBuf) -> Self {
        let suggestion = if path.extension().map(|e| e.eq_ignore_ascii_case("json")).unwrap_or(false) {
            format!(
                "'{}' looks like a JSON machine-readable file. Only delimited (CSV/TSV) chargemasters \
                can be normalized; check the catalog's file_path and format.",
                path.display()
            )
        } else {
            format!(
                "Check if the file exists at '{}'. Make sure the fetch step completed and you have read permissions.",
                path.display()
            )
        };

        Self::FileNotFound { path, suggestion }
    }

    /// Create an unknown mapper error listing the registered ids
    pub fn mapper_not_found(mapper_id: &str, known: Vec<String>) -> Self {
        Self::MapperNotFound {
            mapper_id: mapper_id.to_string(),
            known,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, suggestion: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            suggestion: suggestion.map(str::to_string),
        }
    }

    /// Create a schema error naming the columns a tall file lacks
    pub fn missing_columns(missing: Vec<String>) -> Self {
        Self::SchemaValidation {
            message: format!("Missing required columns: {}", missing.join(", ")),
            missing_columns: missing,
            diagnostics: None,
        }
    }

    /// Create a schema error without missing-column details
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
            missing_columns: Vec::new(),
            diagnostics: None,
        }
    }

    /// Create a data validation error for a single value
    pub fn invalid_value(field: &str, value: &str, message: impl Into<String>) -> Self {
        Self::DataValidation {
            message: message.into(),
            field: Some(field.to_string()),
            value: Some(value.to_string()),
            context: ErrorContext::default(),
        }
    }

    /// Create a date parsing error with format information
    pub fn date_parse(field: &str, value: &str) -> Self {
        Self::invalid_value(
            field,
            value,
            format!("Cannot parse '{}' as a date (expected YYYY-MM-DD or MM/DD/YYYY)", value),
        )
    }

    /// Taxonomy bucket of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MapperNotFound { .. } | Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::HospitalMismatch { .. } | Self::SchemaValidation { .. } => ErrorCategory::Structural,
            Self::CsvParse { .. } | Self::DataValidation { .. } => ErrorCategory::RowLevel,
            Self::FailureRateExceeded { .. } => ErrorCategory::RateExceeded,
            Self::Io { .. } | Self::FileNotFound { .. } | Self::Export { .. } => ErrorCategory::Io,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::Custom { .. } => ErrorCategory::Structural,
        }
    }

    /// Whether running the same source again could succeed without a config or data change
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Io | ErrorCategory::Cancelled)
    }

    /// Diagnostics carried by a structural failure, if any
    pub fn diagnostics(&self) -> Option<&DiagnosticsReport> {
        match self {
            Self::SchemaValidation { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::MapperNotFound { known, .. } => {
                format!("{}\n\nRegistered mappers: {}", self, known.join(", "))
            }
            Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::SchemaValidation { diagnostics: Some(report), .. } if !report.unrecognized_headers.is_empty() => {
                format!(
                    "{}\n\nUnrecognized headers: {}",
                    self,
                    report.unrecognized_headers.join(", ")
                )
            }
            Self::FailureRateExceeded { .. } => {
                format!("{}\n\nSuggestion: check that the source is assigned the right mapper_id and header_row", self)
            }
            Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for ChargemasterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for ChargemasterError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|pos| pos.line());
        let message = err.to_string();

        match err.into_kind() {
            csv::ErrorKind::Io(source) => Self::Io {
                message,
                source,
                context: ErrorContext { line_number: line, ..Default::default() },
            },
            _ => Self::CsvParse {
                message,
                line,
                context: ErrorContext::default(),
            },
        }
    }
}

impl From<serde_json::Error> for ChargemasterError {
    fn from(err: serde_json::Error) -> Self {
        ChargemasterError::Export {
            message: err.to_string(),
            format: ExportFormat::Json,
            suggestion: Some("Check that the canonical document is valid JSON.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_follow_taxonomy() {
        assert_eq!(
            ChargemasterError::mapper_not_found("nope", vec![]).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            ChargemasterError::missing_columns(vec!["payer_name".into()]).category(),
            ErrorCategory::Structural
        );
        let rate = ChargemasterError::FailureRateExceeded { failed: 5, read: 10, rate: 0.5, threshold: 0.1 };
        assert_eq!(rate.category(), ErrorCategory::RateExceeded);
        assert!(!rate.is_retryable());
    }

    #[test]
    fn test_missing_columns_message_names_columns() {
        let err = ChargemasterError::missing_columns(vec!["payer_name".into(), "plan_name".into()]);
        assert!(err.to_string().contains("payer_name, plan_name"));
    }

    #[test]
    fn test_mapper_not_found_lists_known_ids() {
        let err = ChargemasterError::mapper_not_found("acme", vec!["tall".into(), "wide".into()]);
        assert!(err.user_message().contains("tall, wide"));
    }
}
