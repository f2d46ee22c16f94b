//! PCM frame decoder
//!
//! Turns wire bytes back into a [`SampleFrame`], rejecting payloads that
//! cannot be a whole number of samples or exceed the configured frame bound.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::audio::buffer::SampleFrame;
use crate::codec::encoder::BYTES_PER_SAMPLE;
use crate::error::CodecError;

/// Decode little-endian `f32` bytes into samples
pub fn decode_samples(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(CodecError::InvalidFrameSize(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Strip the base64 armor from an envelope payload
pub fn unarmor(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| CodecError::InvalidArmor(e.to_string()))
}

/// Stateful PCM decoder with a per-frame size bound
#[derive(Debug)]
pub struct PcmDecoder {
    max_frame_samples: usize,
    frames_decoded: u64,
    frames_rejected: u64,
    samples_produced: u64,
}

impl PcmDecoder {
    pub fn new(max_frame_samples: usize) -> Self {
        Self {
            max_frame_samples,
            frames_decoded: 0,
            frames_rejected: 0,
            samples_produced: 0,
        }
    }

    /// Decode one frame, tagging it with its sequence number if it had one
    pub fn decode(&mut self, bytes: &[u8], sequence: Option<u64>) -> Result<SampleFrame, CodecError> {
        let samples = match self.check(bytes).and_then(|_| decode_samples(bytes)) {
            Ok(samples) => samples,
            Err(e) => {
                self.frames_rejected += 1;
                return Err(e);
            }
        };

        self.frames_decoded += 1;
        self.samples_produced += samples.len() as u64;

        let frame = SampleFrame::new(samples);
        Ok(match sequence {
            Some(seq) => frame.with_sequence(seq),
            None => frame,
        })
    }

    fn check(&self, bytes: &[u8]) -> Result<(), CodecError> {
        let samples = bytes.len() / BYTES_PER_SAMPLE;
        if samples > self.max_frame_samples {
            return Err(CodecError::FrameTooLarge {
                samples,
                max: self.max_frame_samples,
            });
        }
        Ok(())
    }

    pub fn max_frame_samples(&self) -> usize {
        self.max_frame_samples
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
            samples_produced: self.samples_produced,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub samples_produced: u64,
}
