//! Wire protocol shared by the relay and the HTTP transport
//!
//! Audio bytes never carry a header. The optional sequence number rides
//! beside them in the JSON envelope so a poller can spot stale or
//! duplicated frames. The epoch names the sender instance that numbered
//! them; a new epoch restarts the numbering.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which audio direction of a device a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamChannel {
    /// Audio captured on the device's microphone
    Microphone,
    /// Audio destined for the device's speaker
    Speaker,
}

impl StreamChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamChannel::Microphone => "microphone",
            StreamChannel::Speaker => "speaker",
        }
    }
}

impl Default for StreamChannel {
    fn default() -> Self {
        StreamChannel::Microphone
    }
}

impl fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "microphone" | "mic" => Ok(StreamChannel::Microphone),
            "speaker" => Ok(StreamChannel::Speaker),
            other => Err(format!("unknown audio channel: {}", other)),
        }
    }
}

/// One serialized frame as handed to or received from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Bytes,
    pub sequence: Option<u64>,
    pub epoch: Option<u64>,
}

impl EncodedFrame {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            sequence: None,
            epoch: None,
        }
    }

    pub fn with_sequence(bytes: Bytes, sequence: u64) -> Self {
        Self {
            sequence: Some(sequence),
            ..Self::new(bytes)
        }
    }

    /// Tag the frame with its sender's epoch
    pub fn in_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Body of `POST /api/audio/upload/{device_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Base64-armored little-endian f32 samples
    pub audio_data: String,
    #[serde(default)]
    pub audio_type: StreamChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    /// Sender wall clock in milliseconds, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Query string of `GET /api/audio/download/{device_id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub audio_type: StreamChannel,
}

/// Status field used by every relay response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Relay reply to an upload or download
///
/// A successful download with no `audio_data` means "nothing new since the
/// last poll", not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AudioResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Success,
            audio_data: None,
            sequence: None,
            epoch: None,
            message: None,
        }
    }

    /// Success carrying one frame's armored audio and its numbering
    pub fn with_audio(audio_data: String, frame: &EncodedFrame) -> Self {
        Self {
            audio_data: Some(audio_data),
            sequence: frame.sequence,
            epoch: frame.epoch,
            ..Self::ok()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            audio_data: None,
            sequence: None,
            epoch: None,
            message: Some(msg.into()),
        }
    }
}
