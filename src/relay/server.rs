//! Relay HTTP server
//!
//! | Method | Path | |
//! |--------|------|-|
//! | POST | `/api/audio/upload/:device_id` | queue one frame |
//! | GET | `/api/audio/download/:device_id?audio_type=` | take the oldest frame |
//! | GET | `/api/status` | counters and uptime |

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::relay::handlers;
use crate::relay::store::RelayStore;

/// Shared application state
pub struct AppState {
    pub store: Arc<RelayStore>,
    pub started: Instant,
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, store: Arc<RelayStore>) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                store,
                started: Instant::now(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<RelayStore> {
        &self.state.store
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/audio/upload/:device_id", post(handlers::upload_audio))
            .route("/api/audio/download/:device_id", get(handlers::download_audio))
            .route("/api/status", get(handlers::get_status))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.http_port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Relay listening on http://{}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        let pruner = spawn_pruner(self.state.store.clone(), self.config.idle_timeout());

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        pruner.abort();
        result?;
        tracing::info!("Relay stopped");
        Ok(())
    }

    /// Serve on a background task
    ///
    /// Binding happens before this returns, so the reported address is
    /// ready for requests.
    pub async fn spawn(&self) -> Result<RelayHandle> {
        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Relay server error: {}", e);
            }
        });
        let pruner = spawn_pruner(self.state.store.clone(), self.config.idle_timeout());

        Ok(RelayHandle {
            local_addr,
            server,
            pruner,
        })
    }
}

/// A relay running in the background
pub struct RelayHandle {
    local_addr: SocketAddr,
    server: JoinHandle<()>,
    pruner: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub async fn shutdown(self) {
        self.pruner.abort();
        self.server.abort();
        let _ = self.server.await;
    }
}

fn spawn_pruner(store: Arc<RelayStore>, max_idle: Duration) -> JoinHandle<()> {
    let period = (max_idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let pruned = store.prune_idle(max_idle);
            if pruned > 0 {
                tracing::info!("Pruned {} idle relay channels", pruned);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::audio::buffer::create_shared_buffer;
    use crate::network::poll::{PollOutcome, Poller};
    use crate::network::{HttpTransport, Transport};
    use crate::protocol::{EncodedFrame, StreamChannel};
    use crate::codec::encode_samples;
    use crate::error::NetworkError;

    async fn spawn_relay() -> RelayHandle {
        let config = RelayConfig {
            bind_address: "127.0.0.1".into(),
            http_port: 0,
            ..RelayConfig::default()
        };
        RelayServer::new(config, Arc::new(RelayStore::new(4)))
            .spawn()
            .await
            .unwrap()
    }

    fn transport(url: String) -> HttpTransport {
        HttpTransport::new(&TransportConfig {
            server_url: url,
            request_timeout_ms: 1_000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_transport_against_relay() {
        let relay = spawn_relay().await;
        let client = transport(relay.url());

        assert_eq!(client.poll("phone 1", StreamChannel::Speaker).await, Ok(None));

        let bytes = encode_samples(&[0.25; 16]);
        client
            .upload("phone 1", StreamChannel::Speaker, EncodedFrame::with_sequence(bytes.clone(), 7))
            .await
            .unwrap();

        let frame = client.poll("phone 1", StreamChannel::Speaker).await.unwrap().unwrap();
        assert_eq!(frame.bytes, bytes);
        assert_eq!(frame.sequence, Some(7));

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_upload_surfaces_relay_message() {
        let relay = spawn_relay().await;
        let client = transport(relay.url());

        let result = client
            .upload("dev", StreamChannel::Microphone, EncodedFrame::new(bytes::Bytes::from_static(&[1, 2, 3])))
            .await;
        assert!(matches!(result, Err(NetworkError::Remote(_))));

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_corrupt_download_counts_as_decode_failure() {
        let stub = Router::new().route(
            "/api/audio/download/:device_id",
            get(|| async { axum::Json(serde_json::json!({ "status": "success", "audio_data": "***" })) }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, stub).await;
        });

        let client = transport(url);
        assert!(matches!(
            client.poll("dev", StreamChannel::Microphone).await,
            Err(NetworkError::InvalidPayload(_))
        ));

        let poller = Poller::new(
            "dev",
            StreamChannel::Microphone,
            Arc::new(client),
            create_shared_buffer(4),
            Duration::from_millis(1_000),
            4096,
        );
        assert_eq!(poller.poll_once().await, PollOutcome::DecodeFailed);
        let stats = poller.stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.transport_failures, 0);
        assert_eq!(stats.consecutive_failures, 0);

        server.abort();
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_an_error() {
        let relay = spawn_relay().await;
        let url = relay.url();
        relay.shutdown().await;

        let client = transport(url);
        assert!(client.poll("dev", StreamChannel::Microphone).await.is_err());
    }
}
