//! Upload worker
//!
//! Drains the capture queue and sends each frame once. A frame that fails
//! or times out is gone; the next one is sent independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::NetworkError;
use crate::network::transport::SharedTransport;
use crate::protocol::{EncodedFrame, StreamChannel};

#[derive(Debug, Default)]
struct UploadCounters {
    uploaded: AtomicU64,
    failed: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Upload statistics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct UploadStats {
    pub uploaded: u64,
    pub failed: u64,
    pub bytes_sent: u64,
}

/// Background task sending captured frames
pub struct UploadWorker {
    handle: Option<JoinHandle<()>>,
    counters: Arc<UploadCounters>,
}

impl UploadWorker {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(
        device_id: impl Into<String>,
        channel: StreamChannel,
        transport: SharedTransport,
        rx: mpsc::Receiver<EncodedFrame>,
        request_timeout: Duration,
    ) -> Self {
        let counters = Arc::new(UploadCounters::default());
        let handle = tokio::spawn(run_uploads(
            device_id.into(),
            channel,
            transport,
            rx,
            request_timeout,
            counters.clone(),
        ));
        Self {
            handle: Some(handle),
            counters,
        }
    }

    /// Abort the worker and wait for it; frames still queued are discarded
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Let the worker finish what is queued once its sender is gone
    pub async fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn stats(&self) -> UploadStats {
        UploadStats {
            uploaded: self.counters.uploaded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_uploads(
    device_id: String,
    channel: StreamChannel,
    transport: SharedTransport,
    mut rx: mpsc::Receiver<EncodedFrame>,
    request_timeout: Duration,
    counters: Arc<UploadCounters>,
) {
    let mut failing = false;

    while let Some(frame) = rx.recv().await {
        let len = frame.bytes.len() as u64;
        let sequence = frame.sequence;

        let result = match tokio::time::timeout(
            request_timeout,
            transport.upload(&device_id, channel, frame),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout),
        };

        match result {
            Ok(()) => {
                counters.uploaded.fetch_add(1, Ordering::Relaxed);
                counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
                if failing {
                    tracing::info!("Uploads for {}/{} recovered", device_id, channel);
                    failing = false;
                }
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                if !failing {
                    tracing::warn!("Upload failed for {}/{}: {}", device_id, channel, e);
                    failing = true;
                } else {
                    tracing::debug!("Upload of frame {:?} failed: {}", sequence, e);
                }
            }
        }
    }

    tracing::debug!("Upload queue for {}/{} closed", device_id, channel);
}
