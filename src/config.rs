//! Configuration
//!
//! Everything has a default so a missing config file just means defaults.
//! Files are TOML and live under the platform config directory unless a
//! path is given explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::StreamChannel;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub transport: TransportConfig,
    pub relay: RelayConfig,
}

/// Engine settings for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Session sample rate, fixed for the lifetime of a session
    pub sample_rate: u32,
    /// Host callback block length in samples
    pub quantum: usize,
    /// Jitter buffer capacity in frames
    pub jitter_capacity: usize,
    /// Poll period while live
    pub poll_interval_ms: u64,
    /// Poll period after repeated failures
    pub fallback_poll_interval_ms: u64,
    /// Consecutive poll failures before switching to the fallback period
    pub backoff_after_failures: u32,
    /// Capture frames waiting for upload before new ones are dropped
    pub upload_queue_capacity: usize,
    /// Largest frame the decoder accepts, in samples
    pub max_frame_samples: usize,
    /// Channel the playback side polls
    pub playback_channel: StreamChannel,
    /// Channel the capture side uploads to
    pub capture_channel: StreamChannel,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            quantum: DEFAULT_QUANTUM,
            jitter_capacity: DEFAULT_JITTER_CAPACITY,
            poll_interval_ms: LIVE_POLL_INTERVAL_MS,
            fallback_poll_interval_ms: FALLBACK_POLL_INTERVAL_MS,
            backoff_after_failures: DEFAULT_BACKOFF_AFTER_FAILURES,
            upload_queue_capacity: DEFAULT_UPLOAD_QUEUE_CAPACITY,
            max_frame_samples: MAX_FRAME_SAMPLES,
            playback_channel: StreamChannel::Microphone,
            capture_channel: StreamChannel::Speaker,
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_interval_ms)
    }

    /// Get quantum duration in milliseconds
    pub fn quantum_duration_ms(&self) -> f32 {
        self.quantum as f32 * 1000.0 / self.sample_rate as f32
    }
}

/// Client-side transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL of the relay, e.g. `http://127.0.0.1:5000`
    pub server_url: String,
    /// Per-request timeout; must stay below the poll period
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{}", DEFAULT_HTTP_PORT),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: String,
    pub http_port: u16,
    /// Frames held per device channel
    pub queue_capacity: usize,
    /// Channels without traffic for this long are dropped
    pub idle_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            queue_capacity: DEFAULT_RELAY_QUEUE_CAPACITY,
            idle_timeout_secs: DEFAULT_RELAY_IDLE_TIMEOUT_SECS,
        }
    }
}

impl RelayConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "polled-audio-stream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`
    ///
    /// A file that does not exist yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let stream = &self.stream;
        if stream.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".into()));
        }
        if stream.quantum == 0 {
            return Err(Error::Config("quantum must be non-zero".into()));
        }
        if stream.jitter_capacity == 0 {
            return Err(Error::Config("jitter_capacity must be at least 1".into()));
        }
        if stream.upload_queue_capacity == 0 {
            return Err(Error::Config("upload_queue_capacity must be at least 1".into()));
        }
        if stream.poll_interval_ms == 0 || stream.fallback_poll_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be non-zero".into()));
        }
        if stream.max_frame_samples < stream.quantum {
            return Err(Error::Config(format!(
                "max_frame_samples ({}) is smaller than quantum ({})",
                stream.max_frame_samples, stream.quantum
            )));
        }
        if self.transport.request_timeout_ms >= stream.poll_interval_ms {
            return Err(Error::Config(format!(
                "request_timeout_ms ({}) must be shorter than poll_interval_ms ({})",
                self.transport.request_timeout_ms, stream.poll_interval_ms
            )));
        }
        if self.relay.queue_capacity == 0 {
            return Err(Error::Config("relay queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
