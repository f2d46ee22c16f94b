//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod host;
pub mod playback;

pub use buffer::{create_shared_buffer, JitterBuffer, SampleFrame, SharedJitterBuffer};
pub use capture::{CaptureEncoder, CaptureOutcome};
pub use device::{list_devices, AudioDeviceInfo, CpalHost};
pub use host::{AudioHost, HostStream, HostStreamConfig, ManualHost};
pub use playback::{PlaybackDrain, RenderOutcome};
