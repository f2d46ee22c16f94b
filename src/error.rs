//! Error types for the audio streaming engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host audio errors
///
/// These only surface while a session is starting; a running session
/// never produces them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Audio resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl AudioError {
    /// Whether this error means the host could not hand out the device at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AudioError::ResourceUnavailable(_) | AudioError::DeviceNotFound(_)
        )
    }
}

/// Frame encoding/decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid frame size: {0} bytes is not a whole number of f32 samples")]
    InvalidFrameSize(usize),

    #[error("Frame too large: {samples} samples (max {max})")]
    FrameTooLarge { samples: usize, max: usize },

    #[error("Invalid base64 payload: {0}")]
    InvalidArmor(String),
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Relay reported error: {0}")]
    Remote(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Timeout")]
    Timeout,
}

impl From<CodecError> for NetworkError {
    fn from(err: CodecError) -> Self {
        NetworkError::InvalidPayload(err.to_string())
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
