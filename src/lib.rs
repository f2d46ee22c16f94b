//! # Polled Audio Stream
//!
//! Pull-based, jitter-buffered PCM audio streaming over periodic
//! request/response polling.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── CLIENT ─────────────────────────────┐
//! │                                                                 │
//! │  ┌────────────┐   on_input()   ┌────────────────┐               │
//! │  │ Host input │ ─────────────▶ │ CaptureEncoder │               │
//! │  │  callback  │                └───────┬────────┘               │
//! │  └────────────┘                        │ try_send               │
//! │                                        ▼                        │
//! │                                ┌────────────────┐               │
//! │                                │ Upload worker  │──── upload ───┼──┐
//! │                                └────────────────┘               │  │
//! │                                                                 │  │
//! │  ┌────────────┐   render()     ┌────────────────┐               │  │
//! │  │Host output │ ◀───────────── │ PlaybackDrain  │               │  │
//! │  │  callback  │                └───────▲────────┘               │  │
//! │  └────────────┘                        │ pop                    │  │
//! │                                ┌───────┴────────┐               │  │
//! │                                │  JitterBuffer  │ drop-oldest   │  │
//! │                                └───────▲────────┘               │  │
//! │                                        │ push                   │  │
//! │                                ┌───────┴────────┐               │  │
//! │                                │ PollScheduler  │◀─── poll ─────┼──┤
//! │                                └────────────────┘               │  │
//! └─────────────────────────────────────────────────────────────────┘  │
//!                                                                      │
//!                        ┌─────────────────────────────┐               │
//!                        │ Relay (relay::server)       │◀──────────────┘
//!                        │ per device/channel queues   │  JSON + base64
//!                        └─────────────────────────────┘
//! ```
//!
//! The host audio callbacks and the polling task meet only at the
//! [`JitterBuffer`](audio::JitterBuffer), which never blocks either side.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod relay;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Session sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Mono only
    pub const CHANNELS: u16 = 1;

    /// Host callback block length in samples
    pub const DEFAULT_QUANTUM: usize = 4096;

    /// Jitter buffer capacity in frames
    pub const DEFAULT_JITTER_CAPACITY: usize = 10;

    /// Poll period for live playback
    pub const LIVE_POLL_INTERVAL_MS: u64 = 50;

    /// Poll period for low-priority or degraded polling
    pub const FALLBACK_POLL_INTERVAL_MS: u64 = 100;

    /// Client request timeout, kept below the live poll period
    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 45;

    /// Consecutive poll failures before falling back to the slower period
    pub const DEFAULT_BACKOFF_AFTER_FAILURES: u32 = 5;

    /// Capture frames allowed to wait for upload
    pub const DEFAULT_UPLOAD_QUEUE_CAPACITY: usize = 8;

    /// Largest accepted frame (one second at 48 kHz)
    pub const MAX_FRAME_SAMPLES: usize = 48000;

    /// Default relay HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 5000;

    /// Frames the relay holds per device channel
    pub const DEFAULT_RELAY_QUEUE_CAPACITY: usize = 10;

    /// Relay channels idle this long are pruned
    pub const DEFAULT_RELAY_IDLE_TIMEOUT_SECS: u64 = 3600;
}
