//! PCM wire codec
//!
//! Frames travel as raw little-endian `f32` mono samples with no header,
//! base64-armored inside the JSON envelope.

pub mod encoder;
pub mod decoder;

pub use encoder::{armor, encode_samples};
pub use decoder::{decode_samples, unarmor, PcmDecoder};
