/*!
 * Diagnostics for input a mapper could not interpret
 *
 * Unrecognized headers and rejected rows are collected during a run and
 * emitted as a sidecar report, so nothing is dropped silently and a column
 * rule can be added later.
 */

use serde::{Deserialize, Serialize};

/// One row the run could not turn into canonical records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based physical line in the source file, when known
    pub line: Option<u64>,
    pub reason: String,
}

/// Sidecar report for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub hospital_id: String,
    pub source_file: String,
    pub mapper_id: String,
    /// Verbatim headers in column order
    pub unrecognized_headers: Vec<String>,
    /// First rejected rows, up to the configured cap
    pub rejected_rows: Vec<RejectedRow>,
    /// Total rejected rows, including those beyond the cap
    pub rejected_rows_total: usize,
}

impl DiagnosticsReport {
    /// Rejected rows alone are a finding, even with every header recognized
    pub fn has_findings(&self) -> bool {
        !self.unrecognized_headers.is_empty() || self.rejected_rows_total > 0
    }
}

/// Collects findings while a run is in progress
#[derive(Debug)]
pub struct DiagnosticsCollector {
    hospital_id: String,
    source_file: String,
    mapper_id: String,
    unrecognized_headers: Vec<String>,
    rejected_rows: Vec<RejectedRow>,
    rejected_rows_total: usize,
    max_reported_rows: usize,
}

impl DiagnosticsCollector {
    pub fn new(hospital_id: &str, source_file: &str, mapper_id: &str, max_reported_rows: usize) -> Self {
        Self {
            hospital_id: hospital_id.to_string(),
            source_file: source_file.to_string(),
            mapper_id: mapper_id.to_string(),
            unrecognized_headers: Vec::new(),
            rejected_rows: Vec::new(),
            rejected_rows_total: 0,
            max_reported_rows,
        }
    }

    /// Record headers the column parser returned as unrecognized
    pub fn record_unrecognized_headers<I>(&mut self, headers: I)
    where
        I: IntoIterator<Item = String>,
    {
        for header in headers {
            if !self.unrecognized_headers.contains(&header) {
                tracing::warn!(
                    hospital_id = %self.hospital_id,
                    header = %header,
                    "Unrecognized column header"
                );
                self.unrecognized_headers.push(header);
            }
        }
    }

    pub fn record_rejected_row(&mut self, line: Option<u64>, reason: impl Into<String>) {
        self.rejected_rows_total += 1;
        if self.rejected_rows.len() < self.max_reported_rows {
            self.rejected_rows.push(RejectedRow { line, reason: reason.into() });
        }
    }

    pub fn unrecognized_headers(&self) -> &[String] {
        &self.unrecognized_headers
    }

    pub fn rejected_rows_total(&self) -> usize {
        self.rejected_rows_total
    }

    /// Snapshot of everything collected so far
    pub fn report(&self) -> DiagnosticsReport {
        DiagnosticsReport {
            hospital_id: self.hospital_id.clone(),
            source_file: self.source_file.clone(),
            mapper_id: self.mapper_id.clone(),
            unrecognized_headers: self.unrecognized_headers.clone(),
            rejected_rows: self.rejected_rows.clone(),
            rejected_rows_total: self.rejected_rows_total,
        }
    }

    /// The final report, or `None` when there is nothing to report
    pub fn finish(self) -> Option<DiagnosticsReport> {
        let report = DiagnosticsReport {
            hospital_id: self.hospital_id,
            source_file: self.source_file,
            mapper_id: self.mapper_id,
            unrecognized_headers: self.unrecognized_headers,
            rejected_rows: self.rejected_rows,
            rejected_rows_total: self.rejected_rows_total,
        };
        report.has_findings().then_some(report)
    }
}
