//! In-process transport
//!
//! Goes straight to a [`RelayStore`] without any HTTP. Useful for a client
//! and relay living in one process, and for exercising the engine without a
//! network. Can be switched offline to simulate an outage.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::NetworkError;
use crate::network::transport::Transport;
use crate::protocol::{EncodedFrame, StreamChannel};
use crate::relay::store::RelayStore;

pub struct LoopbackTransport {
    store: Arc<RelayStore>,
    offline: AtomicBool,
}

impl LoopbackTransport {
    pub fn new(store: Arc<RelayStore>) -> Self {
        Self {
            store,
            offline: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<RelayStore> {
        &self.store
    }

    /// While offline every call fails with `RequestFailed`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), NetworkError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(NetworkError::RequestFailed("loopback transport offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn upload(
        &self,
        device_id: &str,
        channel: StreamChannel,
        frame: EncodedFrame,
    ) -> Result<(), NetworkError> {
        self.check_online()?;
        self.store.upload(device_id, channel, frame);
        Ok(())
    }

    async fn poll(
        &self,
        device_id: &str,
        channel: StreamChannel,
    ) -> Result<Option<EncodedFrame>, NetworkError> {
        self.check_online()?;
        Ok(self.store.download(device_id, channel))
    }
}
