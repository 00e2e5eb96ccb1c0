use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chargemaster::prelude::*;
use std::fmt::Write as _;
use std::hint::black_box;
use std::path::PathBuf;
use std::sync::OnceLock;
use tempfile::TempDir;

const ROWS: usize = 20_000;
const PAYERS: [&str; 8] = ["Aetna", "Cigna", "Humana", "Regence", "Premera", "Kaiser", "Molina", "UHC"];

// Generated once; the temp dir lives for the whole benchmark run
static FIXTURE: OnceLock<(TempDir, PathBuf, PathBuf)> = OnceLock::new();

fn fixture() -> &'static (TempDir, PathBuf, PathBuf) {
    FIXTURE.get_or_init(|| {
        let dir = TempDir::new().expect("temp dir");

        let mut wide = String::from("description,code|1,code|1|type,setting,standard_charge|gross");
        for payer in PAYERS {
            write!(wide, ",standard_charge|{}|Commercial|negotiated_dollar", payer).unwrap();
        }
        wide.push('\n');

        let mut tall = String::from(
            "description,code|1,code|1|type,payer_name,plan_name,standard_charge|gross,standard_charge|negotiated_dollar\n",
        );

        for row in 0..ROWS {
            write!(wide, "Procedure {},{},CPT,outpatient,{}.00", row, 10_000 + row, 500 + row % 300).unwrap();
            for (i, payer) in PAYERS.iter().enumerate() {
                if (row + i) % 5 == 0 {
                    wide.push(',');
                } else {
                    write!(wide, ",{}.{:02}", 200 + (row * 7 + i) % 900, i).unwrap();
                }
                if row < ROWS / 4 {
                    writeln!(
                        tall,
                        "Procedure {},{},CPT,{},Commercial,{}.00,{}.50",
                        row,
                        10_000 + row,
                        payer,
                        500 + row % 300,
                        200 + (row + i) % 900
                    )
                    .unwrap();
                }
            }
            wide.push('\n');
        }

        let wide_path = dir.path().join("wide.csv");
        let tall_path = dir.path().join("tall.csv");
        std::fs::write(&wide_path, wide).expect("write wide fixture");
        std::fs::write(&tall_path, tall).expect("write tall fixture");
        (dir, wide_path, tall_path)
    })
}

fn normalizer(batch_size: usize) -> Normalizer {
    Normalizer::builder()
        .config(ConfigBuilder::new().batch_size(batch_size).progress_bar(false).build())
        .build()
        .expect("valid config")
}

fn benchmark_header_classification(c: &mut Criterion) {
    let headers = [
        "description",
        "code|1",
        "standard_charge|gross",
        "standard_charge|Aetna|PPO-Gold|negotiated_dollar",
        "standard_charge|Aetna|PPO",
        "additional_payer_notes|Aetna|PPO",
    ];

    c.bench_function("classify_headers", |b| {
        b.iter(|| {
            for header in headers {
                black_box(ColumnPatternParser::classify(black_box(header)));
            }
        })
    });
}

fn benchmark_wide_batch_sizes(c: &mut Criterion) {
    let (_, wide_path, _) = fixture();
    let source = SourceRecord::new("bench", wide_path, "wide").with_header_row(0);

    let mut group = c.benchmark_group("wide_normalize");
    group.sample_size(10);
    group.throughput(Throughput::Elements(ROWS as u64));

    for batch_size in [1_000usize, 10_000, 250_000] {
        let normalizer = normalizer(batch_size);
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &source, |b, source| {
            b.iter(|| {
                let outcome = normalizer.normalize(source).expect("normalize");
                black_box(outcome.file.len())
            })
        });
    }
    group.finish();
}

fn benchmark_tall(c: &mut Criterion) {
    let (_, _, tall_path) = fixture();
    let source = SourceRecord::new("bench", tall_path, "cms_tall");
    let normalizer = normalizer(50_000);

    let mut group = c.benchmark_group("tall_normalize");
    group.sample_size(10);
    group.bench_function("cms_tall", |b| {
        b.iter(|| {
            let outcome = normalizer.normalize(&source).expect("normalize");
            black_box(outcome.file.len())
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_header_classification,
    benchmark_wide_batch_sizes,
    benchmark_tall
);
criterion_main!(benches);
