//! PCM frame encoder
//!
//! Serializes mono `f32` sample blocks to the header-free wire layout:
//! consecutive little-endian IEEE-754 floats, nothing else.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of one encoded sample in bytes
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// Encode samples to little-endian `f32` bytes
pub fn encode_samples(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        buf.put_f32_le(sample);
    }
    buf.freeze()
}

/// Base64-armor encoded bytes for the JSON envelope
pub fn armor(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
