//! PriceFuse binary - startup wiring only
//!
//! Loads configuration, validates the venue/quorum matrix, and runs one
//! engine per configured asset until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use pricefuse::config::AppConfig;
use pricefuse::engine::Engine;
use pricefuse::history::HistoricalFetcher;
use pricefuse::persistence::CsvSink;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::load().context("Failed to load configuration")?;
    cfg.validate().context("Invalid configuration")?;
    tracing::info!(config = %cfg.digest(), "PriceFuse starting");

    let fetcher = Arc::new(
        HistoricalFetcher::new(Duration::from_millis(cfg.history.request_timeout_ms))
            .context("Failed to build HTTP client")?,
    );
    let sink = if cfg.persistence.csv_enabled {
        Some(Arc::new(
            CsvSink::new(&cfg.persistence.data_dir).context("Failed to open CSV sinks")?,
        ))
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut engines = Vec::new();
    for asset in cfg.run_assets().context("Invalid asset list")? {
        let engine = Engine::start(&cfg, asset, fetcher.clone(), sink.clone())
            .with_context(|| format!("Failed to start engine for {}", asset))?;
        engines.push(tokio::spawn(engine.run(shutdown_rx.clone())));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    for engine in engines {
        let _ = engine.await;
    }
    tracing::info!("All engines stopped");
    Ok(())
}
