//! Relay server
//!
//! Store-and-forward point for polled audio. Usage:
//! `relay [config.toml]`

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polled_audio_stream::{
    config::AppConfig,
    relay::{RelayServer, RelayStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio relay");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    config.validate()?;

    let store = Arc::new(RelayStore::new(config.relay.queue_capacity));
    let server = RelayServer::new(config.relay.clone(), store.clone());

    tracing::info!(
        "Holding up to {} frames per channel, pruning after {:?} idle",
        config.relay.queue_capacity,
        config.relay.idle_timeout()
    );

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
        })
        .await?;

    let stats = store.stats();
    tracing::info!(
        "Relay stats: {} uploads, {} downloads ({} empty), {} evicted",
        stats.uploads,
        stats.downloads,
        stats.empty_downloads,
        stats.evicted
    );

    Ok(())
}
