use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use nsbu_core::{
    CancellationToken, Converter, ConverterConfig, RowRules, Severity, StatementType, TableSet,
};
use rayon::prelude::*;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod formatter;

#[derive(Parser)]
#[command(name = "nsbu2ifrs")]
#[command(about = "Convert NSBU financial statement workbooks into IFRS layouts", long_about = None)]
#[command(version)]
struct Cli {
    /// XLSX workbooks to convert
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Statement held by the workbooks (balance_sheet, cash_flow, profit_loss)
    #[arg(short, long, value_name = "STATEMENT")]
    statement: StatementType,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Directory with classification tables and row rules overriding the embedded ones
    #[arg(long, value_name = "DIR")]
    tables: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    format: OutputFormat,

    /// Show the Excel formula of each derived row
    #[arg(long)]
    formulas: bool,

    /// Cancel conversions still running after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON output for downstream tooling
    Json,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ConverterConfig> {
    let config = if let Some(config_path) = path {
        ConverterConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        // Try to load default config from current directory if it exists
        let default_config_path = PathBuf::from("nsbu2ifrs.toml");
        if default_config_path.exists() {
            ConverterConfig::from_file(&default_config_path).with_context(|| {
                format!(
                    "Failed to load config from {}",
                    default_config_path.display()
                )
            })?
        } else {
            ConverterConfig::default()
        }
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_converter(config: ConverterConfig, tables: Option<&PathBuf>) -> Result<Converter> {
    match tables {
        Some(dir) => {
            let tables = TableSet::from_dir(dir).with_context(|| {
                format!("Failed to load classification tables from {}", dir.display())
            })?;
            let rules = RowRules::from_dir(dir)
                .with_context(|| format!("Failed to load row rules from {}", dir.display()))?;
            Ok(Converter::with_tables(config, tables, rules))
        }
        None => Converter::with_config(config).context("Embedded tables are invalid"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    let converter = build_converter(config, cli.tables.as_ref())?;

    let token = CancellationToken::new();
    if let Some(secs) = cli.timeout {
        let watchdog = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            tracing::warn!(timeout_secs = secs, "timeout reached, cancelling");
            watchdog.cancel();
        });
    }

    let results: Vec<_> = cli
        .files
        .par_iter()
        .map(|file| {
            let result = converter.convert_file(file, cli.statement, &token);
            (file.as_path(), result)
        })
        .collect();

    match cli.format {
        OutputFormat::Human => formatter::print_human(&results, cli.formulas),
        OutputFormat::Json => formatter::print_json(&results)?,
    }

    // Hard failures and failed checks exit non-zero
    let failed = results.iter().any(|(_, result)| match result {
        Ok(conversion) => conversion.count_at_least(Severity::Error) > 0,
        Err(_) => true,
    });
    std::process::exit(if failed { 1 } else { 0 });
}
