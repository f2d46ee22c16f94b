//! Capture encoder
//!
//! Runs inside the host input callback. Every delivered block becomes one
//! encoded frame with the next sequence number, handed to the upload queue
//! without waiting. When the queue is full the frame is dropped; capture
//! never stalls on the network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::codec::encode_samples;
use crate::protocol::EncodedFrame;

/// What happened to one captured block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Queued { sequence: u64 },
    /// Upload queue full, frame discarded
    Dropped,
    /// Upload worker gone, frame discarded
    Closed,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    frames_encoded: AtomicU64,
    bytes_produced: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Producer side of the upload direction
pub struct CaptureEncoder {
    tx: mpsc::Sender<EncodedFrame>,
    next_sequence: Arc<AtomicU64>,
    epoch: Option<u64>,
    counters: Arc<CaptureCounters>,
}

impl CaptureEncoder {
    pub fn new(tx: mpsc::Sender<EncodedFrame>) -> Self {
        Self::continuing(tx, Arc::new(AtomicU64::new(0)), None)
    }

    /// Number frames from a counter that outlives this encoder
    ///
    /// A capture that stops and starts again keeps counting upward, so a
    /// listener never mistakes its fresh frames for stale ones. Every frame
    /// is tagged with `epoch` when one is given.
    pub fn continuing(
        tx: mpsc::Sender<EncodedFrame>,
        next_sequence: Arc<AtomicU64>,
        epoch: Option<u64>,
    ) -> Self {
        Self {
            tx,
            next_sequence,
            epoch,
            counters: Arc::new(CaptureCounters::default()),
        }
    }

    /// Encode one input block and queue it for upload
    pub fn on_input(&self, block: &[f32]) -> CaptureOutcome {
        if block.is_empty() {
            return CaptureOutcome::Dropped;
        }

        let bytes = encode_samples(block);
        let len = bytes.len() as u64;
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        let mut frame = EncodedFrame::with_sequence(bytes, sequence);
        frame.epoch = self.epoch;

        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.frames_encoded.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes_produced.fetch_add(len, Ordering::Relaxed);
                CaptureOutcome::Queued { sequence }
            }
            Err(TrySendError::Full(_)) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Upload queue full, dropped frame {}", sequence);
                CaptureOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                CaptureOutcome::Closed
            }
        }
    }

    /// Get current sequence number
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    /// Cheap handle for reading counters from outside the callback
    pub fn stats_handle(&self) -> CaptureStatsHandle {
        CaptureStatsHandle {
            counters: self.counters.clone(),
        }
    }
}

/// Shared view of a [`CaptureEncoder`]'s counters
#[derive(Clone)]
pub struct CaptureStatsHandle {
    counters: Arc<CaptureCounters>,
}

impl CaptureStatsHandle {
    pub fn stats(&self) -> CaptureStats {
        let frames_encoded = self.counters.frames_encoded.load(Ordering::Relaxed);
        let bytes_produced = self.counters.bytes_produced.load(Ordering::Relaxed);
        CaptureStats {
            frames_encoded,
            bytes_produced,
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            average_frame_size: if frames_encoded > 0 {
                bytes_produced as f32 / frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Capture statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CaptureStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub frames_dropped: u64,
    pub average_frame_size: f32,
}
