//! Relay frame store
//!
//! One bounded drop-oldest queue per (device, channel). Uploads append,
//! downloads take the oldest waiting frame. Frames that arrive without a
//! sequence number get one from the channel's own counter.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::audio::buffer::JitterBuffer;
use crate::protocol::{EncodedFrame, StreamChannel};

type ChannelKey = (String, StreamChannel);

struct ChannelQueue {
    queue: JitterBuffer<EncodedFrame>,
    next_sequence: AtomicU64,
    last_activity: Mutex<Instant>,
}

impl ChannelQueue {
    fn new(capacity: usize) -> Self {
        Self {
            queue: JitterBuffer::new(capacity),
            next_sequence: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

/// In-memory relay state shared by the HTTP handlers
pub struct RelayStore {
    channels: DashMap<ChannelKey, ChannelQueue>,
    capacity: usize,
    uploads: AtomicU64,
    downloads: AtomicU64,
    empty_downloads: AtomicU64,
    evicted: AtomicU64,
}

impl RelayStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
            uploads: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            empty_downloads: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Queue a frame, stamping a sequence number if it has none
    ///
    /// Returns the sequence number the frame is stored under.
    pub fn upload(&self, device_id: &str, channel: StreamChannel, mut frame: EncodedFrame) -> u64 {
        let entry = self
            .channels
            .entry((device_id.to_string(), channel))
            .or_insert_with(|| ChannelQueue::new(self.capacity));

        let sequence = match frame.sequence {
            Some(seq) => {
                entry.next_sequence.fetch_max(seq.wrapping_add(1), Ordering::Relaxed);
                seq
            }
            None => entry.next_sequence.fetch_add(1, Ordering::Relaxed),
        };
        frame.sequence = Some(sequence);

        if entry.queue.push(frame).is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        entry.touch();
        self.uploads.fetch_add(1, Ordering::Relaxed);
        sequence
    }

    /// Take the oldest waiting frame, if any
    pub fn download(&self, device_id: &str, channel: StreamChannel) -> Option<EncodedFrame> {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        let frame = self
            .channels
            .get(&(device_id.to_string(), channel))
            .and_then(|entry| {
                entry.touch();
                entry.queue.try_pop()
            });
        if frame.is_none() {
            self.empty_downloads.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Frames waiting on one channel
    pub fn pending(&self, device_id: &str, channel: StreamChannel) -> usize {
        self.channels
            .get(&(device_id.to_string(), channel))
            .map(|entry| entry.queue.len())
            .unwrap_or(0)
    }

    /// Drop channels with no traffic for longer than `max_idle`
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let before = self.channels.len();
        self.channels
            .retain(|_, queue| queue.last_activity.lock().elapsed() <= max_idle);
        before - self.channels.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            channels: self.channel_count(),
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            empty_downloads: self.empty_downloads.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Relay statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub channels: usize,
    pub uploads: u64,
    pub downloads: u64,
    pub empty_downloads: u64,
    pub evicted: u64,
}
