//! Per-device streaming sessions

pub mod engine;
pub mod manager;

pub use engine::{Direction, EngineContext, EngineStats, SessionState, StreamEngine};
pub use manager::{SessionRegistry, SessionStats, StreamSession};
