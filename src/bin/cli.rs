use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use chargemaster::logging::{init_logging, LogConfig, LogFormat};
use chargemaster::prelude::*;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "chargemaster")]
#[command(about = "Normalize hospital chargemaster files into canonical charge records", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormatOpt::Pretty, global = true)]
    log_format: LogFormatOpt,
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "CHARGEMASTER_CONFIG")]
    config: Option<PathBuf>,
    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a single source file
    Normalize(NormalizeArgs),
    /// Normalize every enabled source in a manifest
    Batch(BatchArgs),
    /// Show how each column header of a file is classified
    Headers(HeadersArgs),
    /// List registered mapper ids
    Mappers,
}

#[derive(Args)]
struct NormalizeArgs {
    /// Stable hospital id declared by the catalog
    #[arg(long)]
    hospital_id: String,
    /// Mapper id (see `chargemaster mappers`)
    #[arg(short, long)]
    mapper: String,
    /// Source file
    #[arg(short, long)]
    file: PathBuf,
    /// 0-based header row; defaults to the mapper's own default
    #[arg(long)]
    header_row: Option<usize>,
    /// Source format (csv or tsv)
    #[arg(long, default_value = "csv")]
    format: String,
    /// Hospital name used when the file carries none
    #[arg(long)]
    hospital_name: Option<String>,
    /// Output directory for artifacts
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
    /// Override the configured batch size
    #[arg(long)]
    batch_size: Option<usize>,
    /// Also write a flat CSV of the charges
    #[arg(long)]
    csv: bool,
}

#[derive(Args)]
struct BatchArgs {
    /// Source manifest (hospital_id, mapper_id, file_path, header_row, format, enabled, hospital_name)
    #[arg(long)]
    manifest: PathBuf,
    /// Directory of fetched files, laid out as <raw-dir>/<hospital_id>/<date>/
    #[arg(long, default_value = "data/raw")]
    raw_dir: PathBuf,
    /// Output directory for artifacts
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
    /// Only normalize these hospital ids
    #[arg(long)]
    only: Vec<String>,
    /// Also write a flat CSV per hospital
    #[arg(long)]
    csv: bool,
}

#[derive(Args)]
struct HeadersArgs {
    /// Source file
    #[arg(short, long)]
    file: PathBuf,
    /// Mapper whose default header row applies when --header-row is absent
    #[arg(short, long)]
    mapper: Option<String>,
    /// 0-based header row; defaults to the mapper's, or 0 without a mapper
    #[arg(long)]
    header_row: Option<usize>,
    /// Source format (csv or tsv)
    #[arg(long, default_value = "csv")]
    format: String,
    /// Only list unrecognized headers
    #[arg(long)]
    unrecognized: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogFormatOpt {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatOpt> for LogFormat {
    fn from(opt: LogFormatOpt) -> Self {
        match opt {
            LogFormatOpt::Pretty => LogFormat::Pretty,
            LogFormatOpt::Compact => LogFormat::Compact,
            LogFormatOpt::Json => LogFormat::Json,
        }
    }
}

/// One row of the source manifest
#[derive(Debug, Deserialize)]
struct ManifestRow {
    hospital_id: String,
    mapper_id: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    header_row: Option<usize>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    enabled: Option<String>,
    #[serde(default)]
    hospital_name: Option<String>,
}

impl ManifestRow {
    fn is_enabled(&self) -> bool {
        match self.enabled.as_deref().map(|s| s.trim().to_lowercase()) {
            None => true,
            Some(flag) => matches!(flag.as_str(), "" | "y" | "yes" | "true" | "1"),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format.into());
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: {}", e);
    }

    let result = match &cli.command {
        Commands::Normalize(args) => cmd_normalize(&cli, args),
        Commands::Batch(args) => cmd_batch(&cli, args),
        Commands::Headers(args) => cmd_headers(args),
        Commands::Mappers => cmd_mappers(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<NormalizeConfig> {
    let mut config = NormalizeConfig::layered(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.no_progress {
        config.enable_progress_bar = false;
    }
    Ok(config)
}

fn output_dir(arg: Option<&PathBuf>, config: &NormalizeConfig) -> PathBuf {
    arg.cloned()
        .or_else(|| config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("data/canonical"))
}

fn cmd_normalize(cli: &Cli, args: &NormalizeArgs) -> anyhow::Result<ExitCode> {
    let mut config = load_config(cli)?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    let out_dir = output_dir(args.out_dir.as_ref(), &config);
    let pretty = config.pretty_json;

    let mut source = SourceRecord::new(&args.hospital_id, &args.file, &args.mapper)
        .with_format(args.format.parse()?);
    if let Some(header_row) = args.header_row {
        source = source.with_header_row(header_row);
    }
    if let Some(name) = args.hospital_name.as_deref() {
        source = source.with_hospital_name(name);
    }

    let normalizer = Normalizer::builder().config(config).build()?;
    let run = SourceRun { result: normalizer.normalize(&source), source };
    Ok(report_runs(&[run], &out_dir, pretty, args.csv))
}

fn cmd_batch(cli: &Cli, args: &BatchArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(cli)?;
    let out_dir = output_dir(args.out_dir.as_ref(), &config);
    let pretty = config.pretty_json;

    let sources = read_manifest(&args.manifest, &args.raw_dir, &args.only)?;
    if sources.is_empty() {
        bail!("No enabled sources in {}", args.manifest.display());
    }
    println!("Normalizing {} sources...", sources.len());

    let normalizer = Normalizer::builder().config(config).build()?;
    let runs = normalizer.normalize_all(&sources);
    Ok(report_runs(&runs, &out_dir, pretty, args.csv))
}

/// Write artifacts for each run and print one status line per source
fn report_runs(runs: &[SourceRun], out_dir: &Path, pretty: bool, csv: bool) -> ExitCode {
    let mut failed = 0;

    for run in runs {
        match &run.result {
            Ok(outcome) => match write_outcome(outcome, out_dir, pretty, csv) {
                Ok(paths) => {
                    println!(
                        "{}: {} ({} items, {} charges) -> {}",
                        run.hospital_id(),
                        run.status(),
                        outcome.summary.items_emitted,
                        outcome.summary.charges_emitted,
                        paths.canonical.display()
                    );
                    if outcome.diagnostics.is_some() {
                        println!("  diagnostics: {}", paths.diagnostics.display());
                    }
                    if runs.len() == 1 {
                        outcome.summary.print_summary();
                    }
                }
                Err(e) => {
                    failed += 1;
                    eprintln!("{}: failed to write artifacts: {}", run.hospital_id(), e.user_message());
                }
            },
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", run.hospital_id(), run.status());
                eprintln!("{}", e.user_message());
                if let Some(report) = e.diagnostics() {
                    let paths = ArtifactPaths::for_hospital(out_dir, run.hospital_id());
                    let written = std::fs::create_dir_all(out_dir)
                        .map_err(ChargemasterError::from)
                        .and_then(|_| write_diagnostics(report, &paths.diagnostics));
                    match written {
                        Ok(()) => eprintln!("  diagnostics: {}", paths.diagnostics.display()),
                        Err(e) => eprintln!("  failed to write diagnostics: {}", e),
                    }
                }
            }
        }
    }

    if runs.len() > 1 {
        println!("{} of {} sources normalized", runs.len() - failed, runs.len());
    }

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn read_manifest(manifest: &Path, raw_dir: &Path, only: &[String]) -> anyhow::Result<Vec<SourceRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(manifest)
        .with_context(|| format!("Failed to open manifest {}", manifest.display()))?;

    let mut sources = Vec::new();
    for (index, row) in reader.deserialize::<ManifestRow>().enumerate() {
        let row = row.with_context(|| format!("Invalid manifest row {}", index + 2))?;
        if !row.is_enabled() || (!only.is_empty() && !only.contains(&row.hospital_id)) {
            continue;
        }

        let file_path = match row.file_path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => latest_raw_file(raw_dir, &row.hospital_id)?,
        };
        let format: SourceFormat = row.format.as_deref().unwrap_or("csv").parse()?;

        let mut source = SourceRecord::new(&row.hospital_id, file_path, &row.mapper_id).with_format(format);
        if let Some(header_row) = row.header_row {
            source = source.with_header_row(header_row);
        }
        if let Some(name) = row.hospital_name.as_deref().filter(|n| !n.is_empty()) {
            source = source.with_hospital_name(name);
        }
        source.validate()?;
        sources.push(source);
    }
    Ok(sources)
}

/// Newest delimited file under `<raw_dir>/<hospital_id>/<date>/`
fn latest_raw_file(raw_dir: &Path, hospital_id: &str) -> anyhow::Result<PathBuf> {
    let hospital_dir = raw_dir.join(hospital_id);
    let mut dates: Vec<PathBuf> = std::fs::read_dir(&hospital_dir)
        .with_context(|| format!("No fetched files for {} in {}", hospital_id, hospital_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dates.sort();

    for dir in dates.iter().rev() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("tsv"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if let Some(file) = files.pop() {
            return Ok(file);
        }
    }

    bail!("No CSV file found for {} under {}", hospital_id, hospital_dir.display())
}

/// Header row for `headers`: the explicit flag, then the mapper's default, then row 0
fn resolve_header_row(args: &HeadersArgs, registry: &MapperRegistry) -> anyhow::Result<usize> {
    if let Some(row) = args.header_row {
        return Ok(row);
    }
    match &args.mapper {
        Some(id) => Ok(registry.resolve(id)?.default_header_row()),
        None => Ok(0),
    }
}

fn cmd_headers(args: &HeadersArgs) -> anyhow::Result<ExitCode> {
    let header_row = resolve_header_row(args, &MapperRegistry::with_defaults())?;
    let layout = inspect_headers(&args.file, args.format.parse()?, header_row)?;

    for (index, header, class) in layout.columns() {
        if args.unrecognized && !class.is_unrecognized() {
            continue;
        }
        let described = match class {
            ColumnClass::Scalar { field } => format!("scalar {:?}", field),
            ColumnClass::Pivot { column } => format!(
                "pivot payer={} plan={} charge_type={}",
                column.payer, column.plan, column.charge_type
            ),
            ColumnClass::Unrecognized { .. } => "UNRECOGNIZED".to_string(),
        };
        println!("{:>4}  {:<60}  {}", index, header, described);
    }

    let unrecognized = layout.unrecognized().len();
    println!("{} columns, {} unrecognized", layout.len(), unrecognized);
    Ok(ExitCode::SUCCESS)
}

fn cmd_mappers() -> anyhow::Result<ExitCode> {
    let registry = MapperRegistry::with_defaults();
    for id in registry.ids() {
        let mapper = registry.resolve(&id)?;
        println!("{:<12} default header row {}", id, mapper.default_header_row());
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_args(argv: &[&str]) -> HeadersArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Headers(args) => args,
            _ => panic!("expected the headers subcommand"),
        }
    }

    #[test]
    fn test_headers_row_follows_mapper_default() {
        let registry = MapperRegistry::with_defaults();

        let args = headers_args(&["chargemaster", "headers", "-f", "nwh.csv", "--mapper", "nwh_wide"]);
        assert_eq!(resolve_header_row(&args, &registry).unwrap(), 2);

        let args = headers_args(&["chargemaster", "headers", "-f", "t.csv", "--mapper", "cms_tall"]);
        assert_eq!(resolve_header_row(&args, &registry).unwrap(), 0);

        let args = headers_args(&["chargemaster", "headers", "-f", "w.csv", "-m", "wide", "--header-row", "1"]);
        assert_eq!(resolve_header_row(&args, &registry).unwrap(), 1);

        let args = headers_args(&["chargemaster", "headers", "-f", "w.csv"]);
        assert_eq!(resolve_header_row(&args, &registry).unwrap(), 0);
    }

    #[test]
    fn test_headers_unknown_mapper_is_an_error() {
        let args = headers_args(&["chargemaster", "headers", "-f", "w.csv", "--mapper", "xml_v3"]);
        assert!(resolve_header_row(&args, &MapperRegistry::with_defaults()).is_err());
    }
}
