//! Streaming client
//!
//! Captures the default microphone to the relay and plays the remote
//! channel on the default output. Usage:
//! `client [server_url] [device_id]`

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polled_audio_stream::{
    audio::{device::list_devices, CpalHost},
    config::AppConfig,
    network::HttpTransport,
    session::{Direction, EngineContext, SessionRegistry},
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio client");

    let mut config = AppConfig::load(None)?;
    let mut args = std::env::args().skip(1);
    if let Some(url) = args.next() {
        config.transport.server_url = url;
    }
    let device_id = args
        .next()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    config.validate()?;

    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();

    let host = CpalHost::new(None, None)?;
    let transport = HttpTransport::new(&config.transport)?;
    tracing::info!("Relay: {}  Device id: {}", transport.base_url(), device_id);

    let registry = SessionRegistry::new(EngineContext {
        host: Arc::new(host),
        transport: Arc::new(transport),
        stream: config.stream.clone(),
        request_timeout: config.transport.request_timeout(),
    });

    let mut started = 0;
    for direction in [Direction::Playback, Direction::Capture] {
        match registry.start(&device_id, direction).await {
            Ok(()) => started += 1,
            Err(e) => tracing::warn!("{:?} unavailable: {}", direction, e),
        }
    }
    if started == 0 {
        bail!("no audio device could be opened");
    }

    tracing::info!(
        "Streaming {} Hz mono, {} sample quanta ({:.1} ms) - press Ctrl+C to stop",
        config.stream.sample_rate,
        config.stream.quantum,
        config.stream.quantum_duration_ms()
    );

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                registry.check_streams().await;
                if let Some(stats) = registry.stats(&device_id).await {
                    match serde_json::to_string(&stats) {
                        Ok(json) => tracing::info!("Stats: {}", json),
                        Err(e) => tracing::debug!("Could not serialize stats: {}", e),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    registry.shutdown_all().await;
    Ok(())
}
