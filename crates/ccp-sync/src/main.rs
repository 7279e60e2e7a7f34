//! CCP Sync - incremental sync of CCP sessions and nurse profiles

use anyhow::{Context, Result};
use ccp_common::logging::{init_logging, LogConfig, LogLevel};
use ccp_common::types::parse_iso_date;
use ccp_sync::config::SyncConfig;
use ccp_sync::pipeline::{run_configured, Destination, RangeRequest};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ccp-sync")]
#[command(author, version, about = "Sync CCP training sessions and nurse profiles")]
struct Cli {
    /// Where to write the tables
    #[arg(long, value_enum, default_value_t = Dest::Warehouse)]
    dest: Dest,

    /// First date to fetch (YYYY-MM-DD, local destination only)
    #[arg(long, value_parser = parse_date)]
    start_date: Option<NaiveDate>,

    /// Last date to fetch (YYYY-MM-DD, local destination only)
    #[arg(long, value_parser = parse_date)]
    end_date: Option<NaiveDate>,

    /// Configuration file (defaults to ./ccp-sync.toml when present)
    #[arg(short, long, env = "CCP_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Dest {
    Warehouse,
    Local,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_iso_date(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ccp-sync")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "ccp-sync failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config =
        SyncConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let (destination, request) = match cli.dest {
        Dest::Warehouse => {
            if cli.start_date.is_some() || cli.end_date.is_some() {
                info!("--start-date/--end-date are ignored for the warehouse destination");
            }
            (Destination::Warehouse, RangeRequest::Watermark)
        },
        Dest::Local => (
            Destination::Local,
            RangeRequest::Local {
                start: cli.start_date,
                end: cli.end_date,
            },
        ),
    };

    info!(
        environment = %config.environment,
        source = %config.source_name,
        destination = ?destination,
        "Starting sync"
    );

    let today = chrono::Local::now().date_naive();
    let report = run_configured(&config, destination, request, today).await?;
    info!(range = %report.range, "Done");

    Ok(())
}
