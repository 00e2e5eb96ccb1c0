/*!
 * Property tests: canonical output does not depend on batch size
 */

use chargemaster::prelude::*;
use proptest::prelude::*;
use tempfile::TempDir;

const PAYER_COLUMNS: [&str; 3] = [
    "standard_charge|Aetna|PPO|negotiated_dollar",
    "standard_charge|Cigna|HMO|negotiated_percentage",
    "standard_charge|Kaiser|Gold|capitated",
];

#[derive(Debug, Clone)]
enum Cell {
    Blank,
    Text,
    Cents(u32),
}

fn cell() -> impl Strategy<Value = Cell> {
    prop_oneof![
        2 => Just(Cell::Blank),
        1 => Just(Cell::Text),
        5 => (0u32..10_000_000).prop_map(Cell::Cents),
    ]
}

#[derive(Debug, Clone)]
enum Row {
    Priced(Option<u8>, Vec<Cell>),
    /// Too few fields on one line
    Truncated,
    /// A closed quote folds two physical lines into one short record
    Folded,
}

impl Row {
    /// Physical lines this row fails, zero for a priced row
    fn failed_lines(&self) -> usize {
        match self {
            Row::Priced(..) => 0,
            Row::Truncated => 1,
            Row::Folded => 2,
        }
    }

    fn lines(&self) -> usize {
        self.failed_lines().max(1)
    }
}

fn row() -> impl Strategy<Value = Row> {
    prop_oneof![
        18 => (
            prop::option::weighted(0.9, 0u8..6),
            prop::collection::vec(cell(), PAYER_COLUMNS.len() + 1),
        )
            .prop_map(|(item, cells)| Row::Priced(item, cells)),
        1 => Just(Row::Truncated),
        1 => Just(Row::Folded),
    ]
}

fn render(rows: &[Row]) -> String {
    let mut out = format!("description,code|1,standard_charge|gross,{}\n", PAYER_COLUMNS.join(","));
    for row in rows {
        let (item, cells) = match row {
            Row::Priced(item, cells) => (item, cells),
            Row::Truncated => {
                out.push_str("Procedure 9,90009\n");
                continue;
            }
            Row::Folded => {
                out.push_str("Procedure 9,\"90009\ncontinued\"\n");
                continue;
            }
        };
        match item {
            Some(n) => out.push_str(&format!("Procedure {},{}", n, 90_000 + u32::from(*n))),
            None => out.push_str(","),
        }
        for cell in cells {
            match cell {
                Cell::Blank => out.push(','),
                Cell::Text => out.push_str(",N/A"),
                Cell::Cents(c) => out.push_str(&format!(",{}.{:02}", c / 100, c % 100)),
            }
        }
        out.push('\n');
    }
    out
}

/// Canonical bytes on success, the error text on failure
fn normalize_with(batch_size: usize, source: &SourceRecord) -> std::result::Result<Vec<u8>, String> {
    let normalizer = Normalizer::builder()
        .config(
            ConfigBuilder::new()
                .batch_size(batch_size)
                .max_failure_rate(1.0)
                .progress_bar(false)
                .build(),
        )
        .build()
        .map_err(|e| e.to_string())?;

    normalizer
        .normalize(source)
        .and_then(|outcome| JsonExporter::new().to_vec(&outcome.file))
        .map_err(|e| e.to_string())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn output_is_identical_for_any_batch_size(rows in prop::collection::vec(row(), 0..60)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wide.csv");
        std::fs::write(&path, render(&rows)).unwrap();
        let source = SourceRecord::new("h1", &path, "wide").with_header_row(0);

        let baseline = normalize_with(250_000, &source);
        for batch_size in [1, 2, 7, 1_000] {
            prop_assert_eq!(&normalize_with(batch_size, &source), &baseline);
        }
    }

    #[test]
    fn charge_count_matches_numeric_cells(rows in prop::collection::vec(row(), 1..40)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wide.csv");
        std::fs::write(&path, render(&rows)).unwrap();
        let source = SourceRecord::new("h1", &path, "wide").with_header_row(0);

        let expected: usize = rows
            .iter()
            .map(|row| match row {
                Row::Priced(Some(_), cells) => cells.iter().filter(|c| matches!(c, Cell::Cents(_))).count(),
                _ => 0,
            })
            .sum();
        let failed: usize = rows.iter().map(Row::failed_lines).sum();
        let read: usize = rows.iter().map(Row::lines).sum();

        let normalizer = Normalizer::builder()
            .config(ConfigBuilder::new().batch_size(3).max_failure_rate(0.1).progress_bar(false).build())
            .build()
            .unwrap();
        match normalizer.normalize(&source) {
            Ok(outcome) => {
                prop_assert_eq!(outcome.file.len(), expected);
                prop_assert_eq!(outcome.summary.rows_failed, failed);
                prop_assert_eq!(outcome.summary.rows_read, read);
            }
            Err(e) if failed as f64 / read as f64 > 0.1 => {
                prop_assert_eq!(e.category(), ErrorCategory::RateExceeded);
            }
            Err(e) => {
                prop_assert_eq!(expected, 0);
                prop_assert_eq!(e.category(), ErrorCategory::Structural);
            }
        }
    }
}
