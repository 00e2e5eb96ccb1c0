/*!
 * Results of a normalization run
 */

use serde::{Deserialize, Serialize};

use crate::data_types::HospitalTransparencyFile;
use crate::diagnostics::DiagnosticsReport;

/// Counters returned to the caller; never part of the canonical payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Data rows read, including rows that failed to parse
    pub rows_read: usize,
    /// Rows that could not be parsed or mapped
    pub rows_failed: usize,
    /// Rows without a code or description
    pub rows_skipped_no_identity: usize,
    pub charges_emitted: usize,
    /// Tall rows whose charge type is outside the vocabulary
    pub charges_dropped_unknown_type: usize,
    /// Empty or non-numeric amount cells
    pub cells_skipped: usize,
    /// Numeric amount cells the canonical model cannot hold
    pub cells_rejected: usize,
    pub unrecognized_headers: usize,
    pub items_emitted: usize,
    pub batches: usize,
}

impl RunSummary {
    /// Ratio of failed rows to rows read
    pub fn failure_rate(&self) -> f64 {
        if self.rows_read == 0 {
            0.0
        } else {
            self.rows_failed as f64 / self.rows_read as f64
        }
    }

    /// Whether anything besides legitimately empty cells was skipped
    pub fn has_losses(&self) -> bool {
        self.rows_failed > 0
            || self.rows_skipped_no_identity > 0
            || self.charges_dropped_unknown_type > 0
            || self.cells_rejected > 0
            || self.unrecognized_headers > 0
    }

    /// Print a short human-readable summary
    pub fn print_summary(&self) {
        println!("Rows read:                 {}", self.rows_read);
        println!("Rows failed:               {}", self.rows_failed);
        println!("Rows without identity:     {}", self.rows_skipped_no_identity);
        println!("Items emitted:             {}", self.items_emitted);
        println!("Charges emitted:           {}", self.charges_emitted);
        println!("Unknown charge types:      {}", self.charges_dropped_unknown_type);
        println!("Cells skipped (empty/NaN): {}", self.cells_skipped);
        println!("Cells rejected:            {}", self.cells_rejected);
        println!("Unrecognized headers:      {}", self.unrecognized_headers);
    }
}

/// File-level result shown to users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    SuccessWithDiagnostics,
    Failed(String),
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::SuccessWithDiagnostics => write!(f, "success with diagnostics"),
            RunStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything a successful run produces
#[derive(Debug, Clone)]
pub struct MappingOutcome {
    pub file: HospitalTransparencyFile,
    pub summary: RunSummary,
    pub diagnostics: Option<DiagnosticsReport>,
}

impl MappingOutcome {
    pub fn status(&self) -> RunStatus {
        if self.diagnostics.is_some() || self.summary.has_losses() {
            RunStatus::SuccessWithDiagnostics
        } else {
            RunStatus::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate() {
        let summary = RunSummary { rows_read: 8, rows_failed: 2, ..Default::default() };
        assert_eq!(summary.failure_rate(), 0.25);
        assert_eq!(RunSummary::default().failure_rate(), 0.0);
    }

    #[test]
    fn test_empty_cells_are_not_losses() {
        let summary = RunSummary { rows_read: 3, charges_emitted: 2, cells_skipped: 4, ..Default::default() };
        assert!(!summary.has_losses());
        let skipped = RunSummary { rows_skipped_no_identity: 1, ..summary };
        assert!(skipped.has_losses());
    }
}
