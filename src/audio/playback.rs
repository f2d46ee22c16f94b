//! Playback drain
//!
//! Runs inside the host output callback. Pulls at most one frame per
//! quantum and always leaves the output block fully written: frame samples
//! first, zeros for whatever the frame did not cover.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::buffer::SharedJitterBuffer;

/// What a single render call produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A frame was played; `copied` samples came from it
    Frame { copied: usize },
    /// Buffer was empty, the block is silence
    Underrun,
}

/// Consumer side of the jitter buffer
pub struct PlaybackDrain {
    buffer: SharedJitterBuffer,
    frames_rendered: AtomicU64,
    underruns: AtomicU64,
    truncated: AtomicU64,
}

impl PlaybackDrain {
    pub fn new(buffer: SharedJitterBuffer) -> Self {
        Self {
            buffer,
            frames_rendered: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
        }
    }

    /// Fill `out` from the next frame, or with silence on underrun
    ///
    /// Never blocks and never allocates. Samples of a frame longer than
    /// `out` beyond its length are discarded.
    pub fn render(&self, out: &mut [f32]) -> RenderOutcome {
        let Some(frame) = self.buffer.pop() else {
            out.fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
            return RenderOutcome::Underrun;
        };

        let samples = frame.samples();
        let copied = samples.len().min(out.len());
        out[..copied].copy_from_slice(&samples[..copied]);
        out[copied..].fill(0.0);

        if samples.len() > out.len() {
            self.truncated.fetch_add(1, Ordering::Relaxed);
        }
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
        RenderOutcome::Frame { copied }
    }

    pub fn buffer(&self) -> &SharedJitterBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> DrainStats {
        DrainStats {
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
        }
    }
}

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DrainStats {
    pub frames_rendered: u64,
    pub underruns: u64,
    pub truncated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_buffer, SampleFrame};

    #[test]
    fn test_underrun_renders_silence() {
        let drain = PlaybackDrain::new(create_shared_buffer(10));
        let mut out = vec![1.0f32; 4096];

        assert_eq!(drain.render(&mut out), RenderOutcome::Underrun);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(drain.stats().underruns, 1);
    }

    #[test]
    fn test_short_frame_is_zero_padded() {
        let buffer = create_shared_buffer(10);
        let samples: Vec<f32> = (0..2000).map(|i| (i as f32 + 1.0) / 2000.0).collect();
        buffer.push(SampleFrame::new(samples.clone()));

        let drain = PlaybackDrain::new(buffer);
        let mut out = vec![9.0f32; 4096];
        assert_eq!(drain.render(&mut out), RenderOutcome::Frame { copied: 2000 });

        assert_eq!(&out[..2000], samples.as_slice());
        assert_eq!(out[2000..].len(), 2096);
        assert!(out[2000..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_long_frame_is_truncated() {
        let buffer = create_shared_buffer(10);
        buffer.push(SampleFrame::new(vec![0.5; 6]));

        let drain = PlaybackDrain::new(buffer.clone());
        let mut out = [0.0f32; 4];
        assert_eq!(drain.render(&mut out), RenderOutcome::Frame { copied: 4 });
        assert_eq!(out, [0.5; 4]);
        assert_eq!(drain.stats().truncated, 1);
        // Remainder of the frame is not carried into the next block
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_one_frame_per_quantum() {
        let buffer = create_shared_buffer(10);
        buffer.push(SampleFrame::new(vec![0.1; 4]));
        buffer.push(SampleFrame::new(vec![0.2; 4]));

        let drain = PlaybackDrain::new(buffer);
        let mut out = [0.0f32; 4];

        drain.render(&mut out);
        assert_eq!(out, [0.1; 4]);
        drain.render(&mut out);
        assert_eq!(out, [0.2; 4]);
        assert_eq!(drain.render(&mut out), RenderOutcome::Underrun);
        assert_eq!(out, [0.0; 4]);

        let stats = drain.stats();
        assert_eq!(stats.frames_rendered, 2);
        assert_eq!(stats.underruns, 1);
    }
}
