//! Chartforge CLI - serve the API or run pipeline steps locally
//!
//! # Main Commands
//!
//! ```bash
//! chartforge serve                       # Start HTTP server (port 3000)
//! chartforge sweep                       # Reconcile export records and files
//! ```
//!
//! # Debug Commands (for development)
//!
//! ```bash
//! chartforge parse sales.csv             # Adapter + normalizer output as JSON
//! chartforge fetch https://host/data     # Ingest a remote JSON array
//! chartforge analyze "some text"         # Free-text analysis row
//! chartforge place --layout '[...]'      # Next free grid position
//! ```

use chartforge::layout::validate;
use chartforge::sources::api::{build_client, validate_url};
use chartforge::{
    analyze_text, normalize, place, start_server, ApiAdapter, AppConfig, AppState, CsvAdapter, ExportLayoutItem,
    NormalizedSource, SourceAdapter, SourceKind, SpreadsheetAdapter,
};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "chartforge")]
#[command(about = "Ingest tabular data and export multi-chart documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: PORT or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Parse a CSV or spreadsheet file and output the normalized source
    Parse {
        /// Input file (.csv, .xlsx, .xlsm, .xls, .ods)
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch a remote JSON array and output the normalized source
    Fetch {
        /// http(s) URL returning a JSON array of objects
        url: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze free text
    Analyze {
        /// Text to analyze
        text: String,
    },

    /// Find the next free grid position for an item
    Place {
        /// Existing layout as a JSON array of items
        #[arg(short, long, default_value = "[]")]
        layout: String,

        /// Item width in columns
        #[arg(short, long, default_value = "4")]
        w: u32,

        /// Item height in rows
        #[arg(short = 'H', long, default_value = "6")]
        h: u32,
    },

    /// Remove orphan export files and report records without artifacts
    Sweep {
        /// Only remove files at least this old
        #[arg(long, default_value = "3600")]
        min_age_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { port } => cmd_serve(port).await,
        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()).await,
        Commands::Fetch { url, output } => cmd_fetch(&url, output.as_deref()).await,
        Commands::Analyze { text } => cmd_analyze(&text),
        Commands::Place { layout, w, h } => cmd_place(&layout, w, h),
        Commands::Sweep { min_age_secs } => cmd_sweep(min_age_secs).await,
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_serve(port: Option<u16>) -> CliResult {
    let mut config = AppConfig::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }
    start_server(config).await
}

async fn cmd_parse(input: &Path, output: Option<&Path>) -> CliResult {
    let name = input.to_string_lossy();
    let kind = SourceKind::from_file_name(&name)
        .ok_or_else(|| format!("Unsupported file type: {}", input.display()))?;

    eprintln!("Parsing {} as {}", input.display(), kind.as_str());
    let parsed = match kind {
        SourceKind::Spreadsheet => SpreadsheetAdapter::new(input).parse().await?,
        _ => CsvAdapter::new(input).parse().await?,
    };
    let normalized = normalize(parsed)?;
    eprintln!("Fields: {}", normalized.fields.join(", "));
    eprintln!("Parsed {} rows", normalized.rows.len());

    write_output(&source_json(&normalized)?, output)
}

async fn cmd_fetch(url: &str, output: Option<&Path>) -> CliResult {
    let config = AppConfig::from_env()?;
    validate_url(url)?;

    eprintln!("Fetching {}", url);
    let adapter = ApiAdapter::with_client(build_client(config.fetch_timeout)?, url);
    let normalized = normalize(adapter.parse().await?)?;
    eprintln!("Fetched {} rows", normalized.rows.len());

    write_output(&source_json(&normalized)?, output)
}

fn cmd_analyze(text: &str) -> CliResult {
    let row = analyze_text(text)?;
    println!("{}", serde_json::to_string_pretty(&row)?);
    Ok(())
}

fn cmd_place(layout: &str, w: u32, h: u32) -> CliResult {
    let layout: Vec<ExportLayoutItem> = serde_json::from_str(layout)?;
    validate(&layout)?;
    let (x, y) = place(&layout, w, h)?;
    println!("{}", json!({ "x": x, "y": y }));
    Ok(())
}

async fn cmd_sweep(min_age_secs: u64) -> CliResult {
    let config = AppConfig::from_env()?;
    let state = AppState::from_config(&config).await?;
    let report = state.exports.sweep(Duration::from_secs(min_age_secs)).await?;

    eprintln!(
        "Removed {} orphan file(s); {} export(s) missing their artifact",
        report.removed_files.len(),
        report.missing_artifacts.len()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn source_json(source: &NormalizedSource) -> Result<String, serde_json::Error> {
    let value: Value = json!({
        "kind": source.kind,
        "fields": source.fields,
        "rows": source.rows,
    });
    serde_json::to_string_pretty(&value)
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("Output written to {}", p.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}
