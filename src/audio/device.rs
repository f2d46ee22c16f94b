//! Audio device enumeration and the cpal-backed host
//!
//! cpal streams are not `Send` on every platform, so each open stream lives
//! on its own thread for as long as its handle is alive. The callbacks cpal
//! hands us rarely match the engine quantum, so blocks are re-cut to exactly
//! `quantum` samples and fanned out to or folded in from however many
//! channels the device insists on.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::host::{AudioHost, HostStream, HostStreamConfig, InputCallback, OutputCallback};
use crate::error::AudioError;

/// Device description for listings
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    is_input: false,
                    is_output: true,
                });
            }
        }
    }

    devices
}

/// Resolve an input device by name, or the default one
fn find_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::ResourceUnavailable("no default input device".into())),
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::ResourceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(format!("input:{}", name))),
    }
}

/// Resolve an output device by name, or the default one
fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::ResourceUnavailable("no default output device".into())),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::ResourceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(format!("output:{}", name))),
    }
}

/// Host backed by the platform's default cpal host
pub struct CpalHost {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalHost {
    /// Check that the requested devices exist
    ///
    /// `None` selects the system default. Fails with `ResourceUnavailable`
    /// or `DeviceNotFound` when a device cannot be found.
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Result<Self, AudioError> {
        find_input_device(input_device.as_deref())?;
        find_output_device(output_device.as_deref())?;
        Ok(Self {
            input_device,
            output_device,
        })
    }

    /// Playback-only host; no input device is required
    pub fn output_only(output_device: Option<String>) -> Result<Self, AudioError> {
        find_output_device(output_device.as_deref())?;
        Ok(Self {
            input_device: None,
            output_device,
        })
    }
}

impl AudioHost for CpalHost {
    fn name(&self) -> &str {
        "cpal"
    }

    fn resume(&self) -> Result<(), AudioError> {
        // cpal streams start playing when opened; only check the device is still there
        find_output_device(self.output_device.as_deref()).map(|_| ())
    }

    fn open_output(
        &self,
        config: HostStreamConfig,
        render: OutputCallback,
    ) -> Result<Box<dyn HostStream>, AudioError> {
        let device_name = self.output_device.clone();
        let stream = CpalStream::spawn("playback", config, move |error_tx| {
            let device = find_output_device(device_name.as_deref())?;
            let channels = device
                .default_output_config()
                .map_err(|e| AudioError::ResourceUnavailable(e.to_string()))?
                .channels();
            let stream_config = cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let mut reblock = OutputReblock::new(config.quantum, channels as usize, render);
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| reblock.fill(data),
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))
        })?;
        Ok(Box::new(stream))
    }

    fn open_input(
        &self,
        config: HostStreamConfig,
        deliver: InputCallback,
    ) -> Result<Box<dyn HostStream>, AudioError> {
        let device_name = self.input_device.clone();
        let stream = CpalStream::spawn("capture", config, move |error_tx| {
            let device = find_input_device(device_name.as_deref())?;
            let channels = device
                .default_input_config()
                .map_err(|e| AudioError::ResourceUnavailable(e.to_string()))?
                .channels();
            let stream_config = cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let mut reblock = InputReblock::new(config.quantum, channels as usize, deliver);
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| reblock.push(data),
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))
        })?;
        Ok(Box::new(stream))
    }
}

/// Thread that owns one cpal stream
struct CpalStream {
    config: HostStreamConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl CpalStream {
    /// Build the stream on a dedicated thread and wait until it plays
    fn spawn<F>(label: &str, config: HostStreamConfig, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce(crossbeam_channel::Sender<AudioError>) -> Result<cpal::Stream, AudioError>
            + Send
            + 'static,
    {
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-stream", label))
            .spawn(move || {
                let stream = match build(error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, releasing the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("stream thread exited during setup".into()))
            .and_then(|r| r);

        match ready {
            Ok(()) => {
                tracing::debug!("{} stream open ({} samples/quantum)", label, config.quantum);
                Ok(Self {
                    config,
                    running,
                    thread_handle: Some(handle),
                    error_rx,
                })
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }
}

impl HostStream for CpalStream {
    fn config(&self) -> HostStreamConfig {
        self.config
    }

    fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Serves device-sized output callbacks from quantum-sized renders
struct OutputReblock {
    block: Vec<f32>,
    pos: usize,
    channels: usize,
    render: OutputCallback,
}

impl OutputReblock {
    fn new(quantum: usize, channels: usize, render: OutputCallback) -> Self {
        Self {
            block: vec![0.0; quantum],
            // Start exhausted so the first callback renders a fresh block
            pos: quantum,
            channels: channels.max(1),
            render,
        }
    }

    /// Fill interleaved `data`, copying the mono sample to every channel
    fn fill(&mut self, data: &mut [f32]) {
        for frame in data.chunks_mut(self.channels) {
            if self.pos == self.block.len() {
                (self.render)(&mut self.block);
                self.pos = 0;
            }
            frame.fill(self.block[self.pos]);
            self.pos += 1;
        }
    }
}

/// Collects device-sized input callbacks into quantum-sized blocks
struct InputReblock {
    block: Vec<f32>,
    quantum: usize,
    channels: usize,
    deliver: InputCallback,
}

impl InputReblock {
    fn new(quantum: usize, channels: usize, deliver: InputCallback) -> Self {
        Self {
            block: Vec::with_capacity(quantum),
            quantum,
            channels: channels.max(1),
            deliver,
        }
    }

    /// Take the first channel of interleaved `data`
    fn push(&mut self, data: &[f32]) {
        for frame in data.chunks(self.channels) {
            self.block.push(frame[0]);
            if self.block.len() == self.quantum {
                (self.deliver)(&self.block);
                self.block.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_output_reblock_spans_callbacks() {
        let mut counter = 0.0f32;
        let mut reblock = OutputReblock::new(
            4,
            1,
            Box::new(move |block: &mut [f32]| {
                for s in block.iter_mut() {
                    counter += 1.0;
                    *s = counter;
                }
            }),
        );

        let mut first = [0.0f32; 3];
        let mut second = [0.0f32; 3];
        reblock.fill(&mut first);
        reblock.fill(&mut second);
        assert_eq!(first, [1.0, 2.0, 3.0]);
        assert_eq!(second, [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_output_reblock_duplicates_channels() {
        let mut reblock = OutputReblock::new(2, 2, Box::new(|block: &mut [f32]| {
            block.copy_from_slice(&[0.1, 0.2]);
        }));
        let mut data = [0.0f32; 4];
        reblock.fill(&mut data);
        assert_eq!(data, [0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_input_reblock_emits_full_quanta() {
        let blocks = Arc::new(Mutex::new(Vec::new()));
        let sink = blocks.clone();
        let mut reblock = InputReblock::new(
            3,
            2,
            Box::new(move |block: &[f32]| sink.lock().push(block.to_vec())),
        );

        // Interleaved stereo, left channel is kept
        reblock.push(&[1.0, -1.0, 2.0, -2.0]);
        assert!(blocks.lock().is_empty());
        reblock.push(&[3.0, -3.0, 4.0, -4.0]);

        assert_eq!(*blocks.lock(), vec![vec![1.0, 2.0, 3.0]]);
    }
}
