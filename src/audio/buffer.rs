//! Bounded drop-oldest jitter buffer
//!
//! The only structure shared between the polling task and the host audio
//! callback. Built on a lock-free `ArrayQueue`, so neither side ever blocks.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One fixed-duration chunk of mono samples
///
/// Immutable once produced. Frames move by value from stage to stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    samples: Box<[f32]>,
    sequence: Option<u64>,
}

impl SampleFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
            sequence: None,
        }
    }

    /// Tag the frame with the sequence number it travelled with
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Bounded FIFO that evicts the oldest element instead of rejecting the newest
///
/// `len() <= capacity()` holds after every operation. Generic so the relay
/// can queue encoded frames with the same policy.
pub struct JitterBuffer<T = SampleFrame> {
    queue: ArrayQueue<T>,
    pushed: AtomicU64,
    overflow_count: AtomicU64,
    underrun_count: AtomicU64,
}

impl<T> JitterBuffer<T> {
    /// Create a new jitter buffer
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Configuration validation rejects that
    /// before any buffer is built.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            pushed: AtomicU64::new(0),
            overflow_count: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
        }
    }

    /// Append at the tail, evicting the head first when full
    ///
    /// Returns the evicted element, if any.
    pub fn push(&self, item: T) -> Option<T> {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        let evicted = self.queue.force_push(item);
        if evicted.is_some() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Remove the head, counting an underrun when empty
    pub fn pop(&self) -> Option<T> {
        let item = self.queue.pop();
        if item.is_none() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Pop without counting an underrun
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Drain to empty, returning how many elements were discarded
    pub fn clear(&self) -> usize {
        let mut drained = 0;
        while self.queue.pop().is_some() {
            drained += 1;
        }
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.pushed.store(0, Ordering::Relaxed);
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            level: self.len(),
            capacity: self.capacity(),
            pushed: self.pushed.load(Ordering::Relaxed),
            overflows: self.overflow_count(),
            underruns: self.underrun_count(),
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct JitterBufferStats {
    pub level: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub overflows: u64,
    pub underruns: u64,
}

impl JitterBufferStats {
    /// Fraction of pushed frames that were evicted before playback
    pub fn drop_rate(&self) -> f32 {
        if self.pushed == 0 {
            0.0
        } else {
            self.overflows as f32 / self.pushed as f32
        }
    }
}

/// Thread-safe handle to a jitter buffer
pub type SharedJitterBuffer = Arc<JitterBuffer>;

/// Create a new shared jitter buffer
pub fn create_shared_buffer(capacity: usize) -> SharedJitterBuffer {
    Arc::new(JitterBuffer::new(capacity))
}
