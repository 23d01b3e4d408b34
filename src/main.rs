// ABOUTME: CLI entry point for table-replicator
// ABOUTME: Parses commands, loads configuration and routes to handlers

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use table_replicator::commands;
use table_replicator::config::AppConfig;

#[derive(Parser)]
#[command(name = "table-replicator")]
#[command(about = "Mirror SQL Server tables into another database, schema and data", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.toml (defaults to ~/.table-replicator/config.toml)
    #[arg(long, global = true, env = "TABLE_REPLICATOR_CONFIG")]
    config: Option<PathBuf>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize every selected and enabled table
    Sync {
        /// Only synchronize these tables (schema.table, repeatable or comma-separated)
        #[arg(long = "table", value_delimiter = ',')]
        tables: Vec<String>,
    },
    /// Show the sync ledger
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Reset counters, error and watermarks for one table
    Reset {
        #[arg(long)]
        table: String,
    },
    /// List user tables in the source database
    Tables,
    /// Print the DDL script that would mirror a source table
    Ddl {
        #[arg(long)]
        table: String,
    },
    /// Check connectivity and that configured tables exist at source
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    match cli.command {
        Commands::Sync { tables } => {
            let stats = commands::sync(&config, &tables).await?;
            if stats.has_failures() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Status { json } => commands::status(&config, json).await,
        Commands::Reset { table } => commands::reset(&config, &table).await,
        Commands::Tables => commands::tables(&config).await,
        Commands::Ddl { table } => commands::ddl(&config, &table).await,
        Commands::Validate => commands::validate(&config).await,
    }
}
