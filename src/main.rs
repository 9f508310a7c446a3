//! `blackline-sync` command line.
//!
//! Usage:
//!   # One-shot load, prints a per-collection summary
//!   blackline-sync load
//!
//!   # Load, then follow push events and polling for 60 seconds
//!   blackline-sync watch --seconds 60
//!
//!   # Show the effective configuration (API key masked)
//!   blackline-sync --config ./sync.toml config

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use blackline_sync::{SyncConfig, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "blackline-sync")]
#[command(about = "Sync the Metro Blackline site data into memory")]
struct Args {
    /// Config file (defaults to config.toml in the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every collection once and print what arrived
    Load,
    /// Load, then keep the store live until the time is up or Ctrl-C
    Watch {
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blackline_sync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = SyncConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Config => {
            print!("{}", config.redacted().to_toml_string()?);
        }
        Command::Load => {
            let engine = SyncEngine::connect(&config)?;
            let report = engine.load_all().await;
            for (collection, count) in &report.loaded {
                println!("{:<20} {count}", collection.table());
            }
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
        }
        Command::Watch { seconds } => {
            let engine = SyncEngine::connect(&config)?;
            let report = engine.load_all().await;
            tracing::info!(warnings = report.warnings.len(), "Loaded, watching for changes");

            let mut changes = engine.store().subscribe();
            engine.start();
            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                    change = changes.recv() => match change {
                        Ok(change) => println!(
                            "{} changed (version {})",
                            change.collection, change.version
                        ),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "Change listener lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            engine.shutdown().await;
        }
    }
    Ok(())
}
