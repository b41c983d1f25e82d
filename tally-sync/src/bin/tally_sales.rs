//! tally-sales — incremental sales-invoice synchronization
//!
//! Pulls new sales invoices from the ledger API, appends their line items
//! to the local store, and rewrites the CSV mirror. Exit code 0 covers
//! "nothing new to do"; a non-zero exit means the store could not be read
//! or written, or the remote range could not be established at all.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tally_common::config::{self, TomlConfig, DEFAULT_BASE_URL};
use tally_sync::settings::SyncSettings;
use tally_sync::{run_sales, EngineConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for tally-sales
#[derive(Parser, Debug)]
#[command(name = "tally-sales")]
#[command(about = "Sales-invoice synchronization for the tally ledger store")]
#[command(version)]
struct Args {
    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Directory receiving the CSV mirror
    #[arg(short, long)]
    export_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_sync=info,tally_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let toml = TomlConfig::load();

    let database = config::resolve_database_path(args.database.as_deref(), &toml);
    let export_dir = config::resolve_export_dir(args.export_dir.as_deref(), &toml);
    let api_key = config::resolve_api_key(&toml).context("cannot start without an API credential")?;
    let base_url = toml
        .base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    info!("Starting tally-sales");
    info!("Database: {}", database.display());
    info!("Mirror directory: {}", export_dir.display());

    let config = EngineConfig {
        database,
        base_url,
        api_key,
        export_dir,
        settings: SyncSettings::sales(),
    };

    let summary = run_sales(&config)
        .await
        .context("sales synchronization failed")?;

    if summary.degraded() {
        info!(
            failed_pages = summary.pages_failed.len(),
            "run finished degraded; failed pages were assumed empty"
        );
    }
    Ok(())
}
