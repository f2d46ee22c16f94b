//! Transport contract
//!
//! The engine only needs two calls: push one frame up, and ask whether a
//! new frame is waiting. Anything that can do request/response (or a
//! persistent stream behaving like one) can sit behind this trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::NetworkError;
use crate::protocol::{EncodedFrame, StreamChannel};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget upload of one frame
    async fn upload(
        &self,
        device_id: &str,
        channel: StreamChannel,
        frame: EncodedFrame,
    ) -> Result<(), NetworkError>;

    /// Fetch the next waiting frame; `Ok(None)` means nothing new
    async fn poll(
        &self,
        device_id: &str,
        channel: StreamChannel,
    ) -> Result<Option<EncodedFrame>, NetworkError>;
}

/// Thread-safe handle to a transport
pub type SharedTransport = Arc<dyn Transport>;
