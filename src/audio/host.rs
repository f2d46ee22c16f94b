//! Host audio driver abstraction
//!
//! The engine never talks to a sound card directly. It hands callbacks to
//! an [`AudioHost`], which invokes them once per fixed quantum from its own
//! real-time context. Dropping the returned [`HostStream`] releases the
//! device.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::AudioError;

/// Output callback: fill the whole block before returning
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Input callback: one captured block per call
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Stream parameters requested from a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStreamConfig {
    pub sample_rate: u32,
    /// Block length in samples handed to every callback
    pub quantum: usize,
}

/// Handle to an open host stream; dropping it stops the callbacks
pub trait HostStream: Send {
    fn config(&self) -> HostStreamConfig;

    /// Drain an asynchronous stream error, if the host reported one
    fn check_errors(&self) -> Option<AudioError> {
        None
    }
}

/// A clocked audio driver
pub trait AudioHost: Send + Sync {
    fn name(&self) -> &str;

    /// Unlock the output pipeline before first playback
    fn resume(&self) -> Result<(), AudioError>;

    fn open_output(
        &self,
        config: HostStreamConfig,
        render: OutputCallback,
    ) -> Result<Box<dyn HostStream>, AudioError>;

    fn open_input(
        &self,
        config: HostStreamConfig,
        deliver: InputCallback,
    ) -> Result<Box<dyn HostStream>, AudioError>;
}

struct Slot<C> {
    generation: u64,
    config: HostStreamConfig,
    callback: C,
}

#[derive(Default)]
struct ManualState {
    available: AtomicBool,
    resumes: AtomicU64,
    generation: AtomicU64,
    output: Mutex<Option<Slot<OutputCallback>>>,
    input: Mutex<Option<Slot<InputCallback>>>,
}

/// Host whose clock is driven by hand
///
/// Nothing happens until the owner calls [`ManualHost::request_output`] or
/// [`ManualHost::deliver_input`]. Used for headless runs and tests.
#[derive(Clone)]
pub struct ManualHost {
    state: Arc<ManualState>,
}

impl ManualHost {
    pub fn new() -> Self {
        let state = ManualState::default();
        state.available.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// A host whose devices cannot be acquired
    pub fn unavailable() -> Self {
        let host = Self::new();
        host.set_available(false);
        host
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    pub fn resume_count(&self) -> u64 {
        self.state.resumes.load(Ordering::SeqCst)
    }

    pub fn output_open(&self) -> bool {
        self.state.output.lock().is_some()
    }

    pub fn input_open(&self) -> bool {
        self.state.input.lock().is_some()
    }

    /// Run one output quantum and return the rendered block
    ///
    /// Returns `None` when no output stream is open.
    pub fn request_output(&self) -> Option<Vec<f32>> {
        let mut guard = self.state.output.lock();
        let slot = guard.as_mut()?;
        let mut block = vec![0.0f32; slot.config.quantum];
        (slot.callback)(&mut block);
        Some(block)
    }

    /// Deliver one captured block; returns whether an input stream took it
    pub fn deliver_input(&self, block: &[f32]) -> bool {
        let mut guard = self.state.input.lock();
        match guard.as_mut() {
            Some(slot) => {
                (slot.callback)(block);
                true
            }
            None => false,
        }
    }

    fn acquire(&self, config: HostStreamConfig, direction: &str) -> Result<u64, AudioError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(AudioError::ResourceUnavailable(format!(
                "manual host has no {} device",
                direction
            )));
        }
        if config.quantum == 0 {
            return Err(AudioError::UnsupportedFormat("zero quantum".into()));
        }
        Ok(self.state.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHost for ManualHost {
    fn name(&self) -> &str {
        "manual"
    }

    fn resume(&self) -> Result<(), AudioError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(AudioError::ResourceUnavailable("manual host is suspended".into()));
        }
        self.state.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn open_output(
        &self,
        config: HostStreamConfig,
        render: OutputCallback,
    ) -> Result<Box<dyn HostStream>, AudioError> {
        let generation = self.acquire(config, "output")?;
        let mut slot = self.state.output.lock();
        if slot.is_some() {
            return Err(AudioError::StreamError("output stream already open".into()));
        }
        *slot = Some(Slot {
            generation,
            config,
            callback: render,
        });
        Ok(Box::new(ManualStream {
            state: self.state.clone(),
            generation,
            config,
            is_output: true,
        }))
    }

    fn open_input(
        &self,
        config: HostStreamConfig,
        deliver: InputCallback,
    ) -> Result<Box<dyn HostStream>, AudioError> {
        let generation = self.acquire(config, "input")?;
        let mut slot = self.state.input.lock();
        if slot.is_some() {
            return Err(AudioError::StreamError("input stream already open".into()));
        }
        *slot = Some(Slot {
            generation,
            config,
            callback: deliver,
        });
        Ok(Box::new(ManualStream {
            state: self.state.clone(),
            generation,
            config,
            is_output: false,
        }))
    }
}

struct ManualStream {
    state: Arc<ManualState>,
    generation: u64,
    config: HostStreamConfig,
    is_output: bool,
}

impl HostStream for ManualStream {
    fn config(&self) -> HostStreamConfig {
        self.config
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        if self.is_output {
            let mut slot = self.state.output.lock();
            if slot.as_ref().map(|s| s.generation) == Some(self.generation) {
                *slot = None;
            }
        } else {
            let mut slot = self.state.input.lock();
            if slot.as_ref().map(|s| s.generation) == Some(self.generation) {
                *slot = None;
            }
        }
    }
}
