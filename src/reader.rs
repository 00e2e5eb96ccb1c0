/*!
 * Chunked streaming over chargemaster source files
 *
 * `SourceStream` owns the open file for one run. It reads the hospital
 * metadata block and the header row up front, then hands out data rows in
 * batches that always end on a physical row boundary. `ChunkedStreamEngine`
 * drives a mapper's row transform over those batches and assembles the
 * canonical file at the end, so peak memory is bounded by the batch size
 * plus the canonical output itself.
 */

use std::fs::File;
use std::path::Path;
use std::time::Instant;

use csv::{ReaderBuilder, StringRecord};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    catalog::{MapContext, SourceFormat},
    config::NormalizeConfig,
    constants::DEFAULT_BATCH_SIZE,
    data_types::{parse_date_cell, HospitalMetadata, HospitalTransparencyFile},
    diagnostics::DiagnosticsCollector,
    mapper::{ChargeSink, SourceMapper, SourceRow},
    outcome::MappingOutcome,
    schema::{ColumnLayout, ColumnPatternParser},
    ChargemasterError, ErrorContext, Result,
};

/// A source record that could not become a data row
#[derive(Debug, Clone)]
pub struct RowFailure {
    pub line: Option<u64>,
    /// Physical lines the record consumed; more than one when a quote ran on
    pub lines: usize,
    pub reason: String,
}

/// A batch of data rows plus the rows that could not be parsed
#[derive(Debug, Default)]
pub struct RowBatch {
    pub rows: Vec<SourceRow>,
    pub failures: Vec<RowFailure>,
}

impl RowBatch {
    /// Physical rows consumed by this batch, parsed or not
    pub fn rows_read(&self) -> usize {
        self.rows.len() + self.failed_rows()
    }

    /// Physical rows lost to parse failures
    pub fn failed_rows(&self) -> usize {
        self.failures.iter().map(|f| f.lines).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows_read() == 0
    }
}

/// Physical lines a record spans, counting newlines inside quoted fields
fn physical_lines(record: &StringRecord) -> usize {
    1 + record.iter().map(|field| field.matches('\n').count()).sum::<usize>()
}

/// An open source file positioned after its header row
pub struct SourceStream {
    reader: csv::Reader<File>,
    headers: StringRecord,
    metadata_block: Vec<(String, String)>,
    file_size: u64,
}

impl SourceStream {
    /// Open `path` and consume every row up to and including `header_row` (0-based)
    pub fn open<P: AsRef<Path>>(path: P, format: SourceFormat, header_row: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ChargemasterError::file_not_found_with_suggestion(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|e| ChargemasterError::Io {
            message: format!("Failed to open {}", path.display()),
            source: e,
            context: ErrorContext { file_path: Some(path.to_path_buf()), ..Default::default() },
        })?;
        let file_size = file.metadata()?.len();

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(format.delimiter())
            .from_reader(file);

        let mut preamble = Vec::with_capacity(header_row);
        let mut record = StringRecord::new();
        for _ in 0..header_row {
            if !reader.read_record(&mut record)? {
                return Err(ChargemasterError::schema(format!(
                    "File ends before header row {} ({})",
                    header_row,
                    path.display()
                )));
            }
            preamble.push(record.clone());
        }

        if !reader.read_record(&mut record)? {
            return Err(ChargemasterError::schema(format!("File has no header row ({})", path.display())));
        }
        let headers = record;

        // Row 0 holds metadata keys, row 1 their values
        let metadata_block = match preamble.as_slice() {
            [keys, values, ..] => keys
                .iter()
                .zip(values.iter())
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect(),
            [keys] => {
                tracing::warn!(
                    path = %path.display(),
                    header_row,
                    fields = keys.len(),
                    "Ignoring single preamble row: metadata needs a key row and a value row"
                );
                Vec::new()
            }
            [] => Vec::new(),
        };

        Ok(Self { reader, headers, metadata_block, file_size })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// `(key, value)` pairs from the metadata rows above the header row
    pub fn metadata_block(&self) -> &[(String, String)] {
        &self.metadata_block
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }

    /// Read up to `size` parseable rows.
    ///
    /// Rows that fail to parse, or whose field count differs from the
    /// header, are returned as failures and do not count toward `size`.
    /// A failure that swallowed several physical lines counts each of them.
    pub fn next_batch(&mut self, size: usize) -> Result<RowBatch> {
        let size = size.max(1);
        let mut batch = RowBatch { rows: Vec::with_capacity(size.min(8_192)), failures: Vec::new() };
        let expected = self.headers.len();

        while batch.rows.len() < size {
            let mut record = StringRecord::new();
            match self.reader.read_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    let line = record.position().map(|p| p.line());
                    if self.is_unterminated_quote(&record) {
                        // The swallowed final terminator is not a line of its own
                        let lines = physical_lines(&record) - 1;
                        batch.failures.push(RowFailure {
                            line,
                            lines,
                            reason: format!("unterminated quote runs to end of file across {} lines", lines),
                        });
                        continue;
                    }
                    if record.len() != expected {
                        batch.failures.push(RowFailure {
                            line,
                            lines: physical_lines(&record),
                            reason: format!("expected {} fields, found {}", expected, record.len()),
                        });
                        continue;
                    }
                    batch.rows.push(SourceRow { line, record });
                }
                Err(e) => {
                    if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                        return Err(e.into());
                    }
                    let line = e.position().map(|p| p.line());
                    let end = self.reader.position().line();
                    let lines = line.map_or(1, |start| end.saturating_sub(start).max(1) as usize);
                    batch.failures.push(RowFailure { line, lines, reason: format!("CSV error: {}", e) });
                }
            }
        }

        Ok(batch)
    }

    /// An open quote consumes everything up to the end of the file,
    /// including the trailing newline a closed record never keeps.
    fn is_unterminated_quote(&self, record: &StringRecord) -> bool {
        self.bytes_read() >= self.file_size && record.iter().last().is_some_and(|field| field.ends_with('\n'))
    }
}

/// Classify the header row of a file without reading its data rows
pub fn inspect_headers<P: AsRef<Path>>(path: P, format: SourceFormat, header_row: usize) -> Result<ColumnLayout> {
    let stream = SourceStream::open(path, format, header_row)?;
    Ok(ColumnLayout::classify(stream.headers().iter()))
}

/// Drives a mapper over a file in bounded row batches
#[derive(Debug, Clone)]
pub struct ChunkedStreamEngine {
    batch_size: usize,
    max_failure_rate: f64,
    max_reported_rows: usize,
}

impl Default for ChunkedStreamEngine {
    fn default() -> Self {
        Self::from_config(&NormalizeConfig::default())
    }
}

impl ChunkedStreamEngine {
    pub fn from_config(config: &NormalizeConfig) -> Self {
        Self {
            batch_size: if config.batch_size == 0 { DEFAULT_BATCH_SIZE } else { config.batch_size },
            max_failure_rate: config.max_failure_rate,
            max_reported_rows: config.max_reported_rows,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Normalize one file with `mapper`.
    ///
    /// The source file is closed before this returns, on success and on
    /// every error path.
    pub fn run<M>(&self, mapper: &M, path: &Path, ctx: &MapContext) -> Result<MappingOutcome>
    where
        M: SourceMapper + ?Sized,
    {
        ctx.source.validate()?;
        let start_time = Instant::now();
        let header_row = ctx.source.header_row.unwrap_or_else(|| mapper.default_header_row());
        let source_file = ctx.source.source_file_name();

        tracing::info!(
            hospital_id = %ctx.hospital_id(),
            mapper_id = %mapper.id(),
            path = %path.display(),
            batch_size = self.batch_size,
            "Normalizing source file"
        );

        let mut stream = SourceStream::open(path, ctx.source.format, header_row)?;
        let metadata = resolve_metadata(ctx, stream.metadata_block())?;
        let layout = ColumnLayout::classify(stream.headers().iter());

        let mut diagnostics =
            DiagnosticsCollector::new(ctx.hospital_id(), &source_file, mapper.id(), self.max_reported_rows);
        diagnostics.record_unrecognized_headers(layout.unrecognized());

        let mut transform = mapper.prepare(&layout, ctx)?;
        let mut sink = ChargeSink::new(diagnostics, &ctx.config.default_currency);

        #[cfg(feature = "progress")]
        let progress_bar = if ctx.show_progress {
            let pb = ProgressBar::new(stream.file_size());
            let style = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
                .map(|s| s.progress_chars("#>-"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb.set_message(ctx.hospital_id().to_string());
            Some(pb)
        } else {
            None
        };

        loop {
            if ctx.is_cancelled() {
                let rows_read = sink.summary().rows_read;
                tracing::warn!(hospital_id = %ctx.hospital_id(), rows_read, "Run cancelled");
                return Err(ChargemasterError::Cancelled { rows_read });
            }

            let batch = stream.next_batch(self.batch_size)?;
            if batch.is_empty() {
                break;
            }

            sink.count_rows_read(batch.rows_read());
            for failure in &batch.failures {
                sink.record_unparsed_rows(failure.line, failure.lines, &failure.reason);
            }
            transform.map_batch(&batch.rows, &mut sink);
            sink.batch_done();

            tracing::debug!(
                hospital_id = %ctx.hospital_id(),
                batch = sink.summary().batches,
                rows = batch.rows_read(),
                charges = sink.summary().charges_emitted,
                "Batch mapped"
            );

            #[cfg(feature = "progress")]
            if let Some(ref pb) = progress_bar {
                pb.set_position(stream.bytes_read());
            }
        }

        let bytes = stream.file_size();
        drop(stream);

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        let (items, charges, summary, diagnostics) = sink.into_parts();

        if summary.rows_read > 0 && summary.failure_rate() > self.max_failure_rate {
            return Err(ChargemasterError::FailureRateExceeded {
                failed: summary.rows_failed,
                read: summary.rows_read,
                rate: summary.failure_rate(),
                threshold: self.max_failure_rate,
            });
        }

        if summary.rows_read > 0 && charges.is_empty() {
            return Err(ChargemasterError::SchemaValidation {
                message: format!(
                    "No charges emitted from {} data rows in {}",
                    summary.rows_read, source_file
                ),
                missing_columns: Vec::new(),
                diagnostics: Some(Box::new(diagnostics.report())),
            });
        }

        let file = HospitalTransparencyFile::new(metadata, source_file, mapper.id(), items, charges)?;
        let diagnostics = diagnostics.finish();

        let elapsed = start_time.elapsed();
        tracing::info!(
            hospital_id = %file.hospital_id(),
            rows = summary.rows_read,
            items = summary.items_emitted,
            charges = summary.charges_emitted,
            failed = summary.rows_failed,
            size = %format_bytes(bytes),
            elapsed_secs = elapsed.as_secs_f64(),
            "Normalization complete"
        );

        Ok(MappingOutcome { file, summary, diagnostics })
    }
}

/// Build hospital metadata from the catalog record and the file's metadata block
fn resolve_metadata(ctx: &MapContext, block: &[(String, String)]) -> Result<HospitalMetadata> {
    let lookup = |key: &str| -> Option<(String, String)> {
        block.iter().find_map(|(k, v)| {
            let normalized = ColumnPatternParser::normalize_key(k);
            let matches = normalized == key || normalized.starts_with(&format!("{}|", key));
            (matches && !v.is_empty()).then(|| (normalized, v.clone()))
        })
    };
    let value = |key: &str| lookup(key).map(|(_, v)| v);

    if let Some(found) = value("hospital_id") {
        if found != ctx.hospital_id() {
            return Err(ChargemasterError::HospitalMismatch {
                expected: ctx.hospital_id().to_string(),
                found,
            });
        }
    }

    let last_updated_on = match value("last_updated_on") {
        Some(raw) => parse_date_cell("last_updated_on", &raw).unwrap_or_else(|e| {
            tracing::warn!(hospital_id = %ctx.hospital_id(), error = %e, "Ignoring unparseable last_updated_on");
            None
        }),
        None => None,
    };

    // `license_number|WA` carries the issuing state in the key
    let license_number = lookup("license_number").map(|(key, number)| match key.split_once('|') {
        Some((_, state)) if !state.is_empty() => format!("{} ({})", number, state.to_uppercase()),
        _ => number,
    });

    let metadata = HospitalMetadata::new(ctx.hospital_id())?
        .with_name(value("hospital_name").or_else(|| ctx.source.hospital_name.clone()))
        .with_license_number(license_number)
        .with_address(value("hospital_address"))
        .with_location(value("hospital_location"))
        .with_last_updated_on(last_updated_on)
        .with_version(value("version"));

    Ok(metadata)
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceRecord;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_stream_reads_metadata_block_and_header() {
        let file = write_file(
            "hospital_name,last_updated_on,license_number|WA\n\
             General Hospital,2024-07-01,12345\n\
             description,code|1\n\
             Office visit,99213\n",
        );
        let mut stream = SourceStream::open(file.path(), SourceFormat::Csv, 2).unwrap();
        assert_eq!(stream.headers().get(0), Some("description"));
        assert_eq!(stream.metadata_block()[0], ("hospital_name".to_string(), "General Hospital".to_string()));

        let batch = stream.next_batch(10).unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].line, Some(4));
        assert!(stream.next_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_single_preamble_row_is_skipped_without_metadata() {
        let file = write_file("Northwest General price list\ndescription,code|1\nOffice visit,99213\n");
        let mut stream = SourceStream::open(file.path(), SourceFormat::Csv, 1).unwrap();
        assert_eq!(stream.headers().get(1), Some("code|1"));
        assert!(stream.metadata_block().is_empty());

        let batch = stream.next_batch(10).unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].line, Some(3));
    }

    #[test]
    fn test_batches_end_on_row_boundaries() {
        let file = write_file("description,code|1\na,1\nb,2\n\"c\nd\",3\ne,4\n");
        let mut stream = SourceStream::open(file.path(), SourceFormat::Csv, 0).unwrap();
        let sizes: Vec<usize> = std::iter::from_fn(|| {
            let batch = stream.next_batch(3).unwrap();
            (!batch.is_empty()).then(|| batch.rows.len())
        })
        .collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[test]
    fn test_field_count_mismatch_is_a_row_failure() {
        let file = write_file("description,code|1\na,1\nb\nc,3,extra\nd,4\n");
        let mut stream = SourceStream::open(file.path(), SourceFormat::Csv, 0).unwrap();
        let batch = stream.next_batch(100).unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.rows_read(), 4);
    }

    #[test]
    fn test_unterminated_quote_fails_every_swallowed_line() {
        let file = write_file("description,code|1\na,1\nb,\"2\nc,3\nd,4\n");
        let mut stream = SourceStream::open(file.path(), SourceFormat::Csv, 0).unwrap();
        let batch = stream.next_batch(100).unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].line, Some(3));
        assert_eq!(batch.failures[0].lines, 3);
        assert_eq!(batch.rows_read(), 4);
    }

    #[test]
    fn test_closed_multiline_quote_is_one_row() {
        let file = write_file("description,code|1\n\"a\nb\",1\nc,\"x\ny\",extra\n");
        let mut stream = SourceStream::open(file.path(), SourceFormat::Csv, 0).unwrap();
        let batch = stream.next_batch(100).unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.failed_rows(), 2);
        assert_eq!(batch.rows_read(), 3);
    }

    #[test]
    fn test_missing_header_row_is_structural() {
        let file = write_file("only one row\n");
        let err = SourceStream::open(file.path(), SourceFormat::Csv, 2).err().unwrap();
        assert!(matches!(err, ChargemasterError::SchemaValidation { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = SourceStream::open("/no/such/chargemaster.csv", SourceFormat::Csv, 0).err().unwrap();
        assert!(matches!(err, ChargemasterError::FileNotFound { .. }));
    }

    #[test]
    fn test_resolve_metadata_checks_hospital_id() {
        let ctx = MapContext::new(SourceRecord::new("nwh", "f.csv", "wide"), NormalizeConfig::default());
        let block = vec![("hospital_id".to_string(), "other".to_string())];
        assert!(matches!(
            resolve_metadata(&ctx, &block),
            Err(ChargemasterError::HospitalMismatch { .. })
        ));

        let block = vec![
            ("Hospital_Name".to_string(), "Northwest".to_string()),
            ("license_number|wa".to_string(), "12345".to_string()),
            ("last_updated_on".to_string(), "not a date".to_string()),
        ];
        let metadata = resolve_metadata(&ctx, &block).unwrap();
        assert_eq!(metadata.name(), Some("Northwest"));
        assert_eq!(metadata.license_number(), Some("12345 (WA)"));
        assert_eq!(metadata.last_updated_on(), None);
    }

    #[test]
    fn test_engine_settings_come_from_config() {
        let config = NormalizeConfig { batch_size: 0, max_failure_rate: 0.25, ..NormalizeConfig::default() };
        let engine = ChunkedStreamEngine::from_config(&config);
        assert_eq!(engine.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(engine.max_failure_rate, 0.25);
        assert_eq!(ChunkedStreamEngine::default().batch_size(), NormalizeConfig::default().batch_size);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
    }
}
