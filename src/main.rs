// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the bioreactor pH control console
use anyhow::Result;
use clap::Parser;
use log::info;

use std::path::PathBuf;

use tokio::signal;

use rust_bioreactor::config::Config;
use rust_bioreactor::daemon::Daemon;
use rust_bioreactor::export::{build_report, write_report_file};
use rust_bioreactor::store::SqliteStore;

/// Operator console for a bioreactor pH control rig
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Broker connection URL override
    #[arg(long)]
    broker_url: Option<String>,

    /// Reactor database path override
    #[arg(long)]
    database: Option<PathBuf>,

    /// Operator display name recorded on calibrations
    #[arg(long)]
    operator: Option<String>,

    /// Export one experiment to a tabular report and exit
    #[arg(long, value_name = "EXPERIMENT_ID")]
    export: Option<String>,

    /// Output directory for --export
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Start in daemon mode
    #[arg(long, default_value_t = true)]
    server: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    // Validate configuration file if --validate-config is set
    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    // Load configuration; an explicitly named file must exist, the default
    // path may be absent.
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            let default_path = PathBuf::from("config.yaml");
            if default_path.exists() {
                Config::from_file(&default_path)?
            } else {
                info!("No config.yaml found, using defaults");
                Config::default()
            }
        }
    };

    // Apply command line overrides
    config.apply_args(args.broker_url, args.database, args.operator);

    // One-shot export mode bypasses the live stack entirely.
    if let Some(experiment_id) = args.export {
        let store = SqliteStore::open(&config.database.path)
            .map_err(|err| anyhow::anyhow!("failed to open reactor database: {}", err))?;
        let report = build_report(&store, &experiment_id, chrono::Utc::now())
            .map_err(|err| anyhow::anyhow!("export failed: {}", err))?;
        let path = write_report_file(&report, &args.output)
            .map_err(|err| anyhow::anyhow!("export failed: {}", err))?;
        println!("Exported {}", path.display());
        return Ok(());
    }

    if args.server {
        info!("Starting in daemon mode");
        let mut daemon = Daemon::new();
        daemon.launch(&config).await?;

        // Wait for termination signal
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, terminating daemon");
                daemon.shutdown();
                daemon.join().await?;
            }
            Err(err) => {
                eprintln!("Error waiting for shutdown signal: {}", err);
            }
        }

        return Ok(());
    } else {
        println!("Daemon mode disabled");
    }

    Ok(())
}
