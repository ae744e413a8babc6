//! Metagate gateway daemon
//!
//! Loads the configuration, bootstraps the metadata plane and runs
//! the background workers until interrupted.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metagate_common::Config;
use metagate_gateway::App;

#[derive(Parser, Debug)]
#[command(name = "metagate-gateway")]
#[command(about = "Metagate metadata-plane gateway")]
#[command(version)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short, long, default_value = "/etc/metagate/gateway.json")]
    config: String,

    /// Metadata database file, overrides the configuration
    #[arg(long)]
    db_path: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = load_config(&args.config)?;
    if let Some(db_path) = args.db_path {
        config.meta.db_path = db_path;
    }
    if config.debug_mode {
        warn!("debug mode: lifecycle and restore days are counted as seconds");
    }

    info!(db_path = %config.meta.db_path, "starting metagate gateway");
    let app = Arc::new(App::bootstrap(config).context("bootstrap failed")?);
    let tasks = app.spawn_workers();

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    for task in tasks {
        task.abort();
    }
    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("parse {path}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path, "configuration file not found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("read {path}")),
    }
}
