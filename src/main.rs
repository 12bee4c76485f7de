//! Binary entry point for bulkport.
//!
//! Imports, converts and fetches asset files from the command line.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr/print_stdout in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use bulkport::io::{ExportService, Format, ImportOptions, ImportService, TransferInput};
use bulkport::models::{ExportAsset, ParseResult, TransferEvent};
use bulkport::observability::{self, InitOptions};
use bulkport::{TransferConfig, WorkerPool};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Bulkport - bulk import and export of typed content assets.
#[derive(Parser)]
#[command(name = "bulkport")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "BULKPORT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Parse one or more files and report the assets found.
    Import {
        /// Input files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Format of every input (detected per file when omitted).
        #[arg(short, long)]
        format: Option<Format>,

        /// Kind for records that carry none.
        #[arg(short, long)]
        kind: Option<String>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Convert an NDJSON asset file into another format.
    Export {
        /// NDJSON file of assets (`id`, `kind`, `content`, ...).
        input: PathBuf,

        /// Output format (inferred from the output extension when omitted).
        #[arg(short, long)]
        format: Option<Format>,

        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Fetch a presigned URL and parse it on the worker pool.
    Fetch {
        /// Presigned URL.
        url: String,

        /// Format of the remote file.
        #[arg(short, long)]
        format: Format,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List supported formats.
    Formats,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init_from_env(InitOptions {
        verbose: cli.verbose,
        metrics_expose: matches!(cli.command, Commands::Fetch { .. }),
    }) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    let result = match cli.command {
        Commands::Import {
            files,
            format,
            kind,
            json,
        } => cmd_import(&config, files, format, kind, json),
        Commands::Export {
            input,
            format,
            output,
        } => cmd_export(&config, &input, format, &output),
        Commands::Fetch { url, format, json } => cmd_fetch(&config, url, format, json).await,
        Commands::Formats => {
            cmd_formats();
            Ok(())
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration from an explicit file or the default location, then
/// applies environment overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<TransferConfig> {
    let config = match path {
        Some(path) => TransferConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => TransferConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

fn cmd_import(
    config: &TransferConfig,
    files: Vec<PathBuf>,
    format: Option<Format>,
    kind: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let options = ImportOptions {
        format,
        fallback_kind: kind,
    };

    let inputs = files.into_iter().map(TransferInput::from_path).collect();
    let service = ImportService::new(config.clone());
    let result = service.import_with_progress(inputs, &options, |progress| {
        eprint!(
            "\rProcessed {} rows ({:.1}%)",
            progress.rows_processed, progress.percentage
        );
    })?;
    eprintln!();

    print_result(&result, json)
}

fn cmd_export(
    config: &TransferConfig,
    input: &Path,
    format: Option<Format>,
    output: &Path,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let assets = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<ExportAsset>(line)
                .with_context(|| format!("line {} of {}", index + 1, input.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let service = ExportService::new(config.clone());
    let result = service.export_to_file(assets, output, format)?;
    println!(
        "Exported {} assets as {} to {}",
        result.exported,
        result.format,
        output.display()
    );
    Ok(())
}

async fn cmd_fetch(
    config: &TransferConfig,
    url: String,
    format: Format,
    json: bool,
) -> anyhow::Result<()> {
    let pool = WorkerPool::start(config)?;
    let mut stream = pool.parse(url, format);
    let mut result = None;

    while let Some(event) = stream.next().await {
        match event? {
            TransferEvent::Progress(progress) => {
                eprint!(
                    "\rProcessed {} rows, {} bytes",
                    progress.rows_processed, progress.bytes_processed
                );
            },
            TransferEvent::Result(done) => result = Some(done),
        }
    }
    eprintln!();

    let Some(result) = result else {
        bail!("worker finished without a result");
    };
    print_result(&result, json)
}

fn cmd_formats() {
    println!("{:<8} {:<6} {:<8} {:<8} MIME", "FORMAT", "EXT", "IMPORT", "EXPORT");
    for format in Format::all() {
        println!(
            "{:<8} {:<6} {:<8} {:<8} {}",
            format.as_str(),
            format.extension(),
            "yes",
            if format.supports_export() { "yes" } else { "no" },
            format.mime_type()
        );
    }
}

fn print_result(result: &ParseResult, json: bool) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, result)?;
        writeln!(stdout)?;
        return Ok(());
    }

    writeln!(
        stdout,
        "{} assets, {} errors",
        result.items.len(),
        result.errors.len()
    )?;
    for error in &result.errors {
        writeln!(stdout, "  row {}: {error}", error.ordinal)?;
    }
    Ok(())
}
