//! SheetSync CLI - Command-line interface for SheetSync
//!
//! Provides commands for:
//! - Fetching declared data types through the cache and fallback tiers
//! - Version-based sync of delta data types
//! - Inspecting and clearing the shared cache
//! - Viewing and validating configuration
//! - Running a polling loop with a background sync on shutdown

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheetsync_core::config::{Config, LoggingConfig};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod output;

use commands::{
    cache::CacheCommand, config::ConfigCommand, delta::DeltaCommand, fetch::FetchCommand,
    watch::WatchCommand,
};
use context::AppContext;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "sheetsync",
    version,
    about = "Spreadsheet data fetch, cache and sync engine"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics collected by the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch a data type (cache, fast endpoint, export routes)
    Fetch(FetchCommand),
    /// Version-based sync of a delta data type
    #[command(subcommand)]
    Delta(DeltaCommand),
    /// Inspect or clear the shared cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Poll every data type until interrupted
    Watch(WatchCommand),
}

/// Load the configuration file
///
/// An explicitly requested file must exist and parse. The default location
/// falls back to built-in defaults.
fn load_config(explicit: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    match explicit {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            Ok((config, path.clone()))
        }
        None => {
            let path = Config::default_path();
            Ok((Config::load_or_default(&path), path))
        }
    }
}

/// Filter directive for the given verbosity
///
/// Without `-v` the configured level applies; `RUST_LOG` overrides both.
fn filter_directive(logging: &LoggingConfig, verbose: u8) -> String {
    match verbose {
        0 => logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: u8) {
    let directive = filter_directive(logging, verbose);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    // Logs go to stderr so JSON command output stays parseable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging, cli.verbose);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    // Configuration commands must work even when the cache cannot be opened
    if let Commands::Config(cmd) = &cli.command {
        return cmd.execute(&config, &config_path, format);
    }

    let app = AppContext::open(config, config_path).await?;

    let result = match &cli.command {
        Commands::Fetch(cmd) => cmd.execute(&app, format).await,
        Commands::Delta(cmd) => cmd.execute(&app, format).await,
        Commands::Cache(cmd) => cmd.execute(&app, format).await,
        Commands::Watch(cmd) => cmd.execute(&app, format).await,
        Commands::Config(cmd) => cmd.execute(app.config(), app.config_path(), format),
    };

    if cli.metrics {
        print!("{}", app.metrics().encode()?);
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
