//! Session registry
//!
//! Maps device ids to sessions. A session is created by the first start
//! request for its device and removed once both of its engines are idle
//! again. Sessions share nothing mutable with each other.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::AudioError;
use crate::session::engine::{Direction, EngineContext, EngineStats, SessionState, StreamEngine};

/// Both engines of one device
pub struct StreamSession {
    device_id: String,
    playback: StreamEngine,
    capture: StreamEngine,
}

impl StreamSession {
    pub fn new(device_id: impl Into<String>, ctx: &EngineContext) -> Self {
        let device_id = device_id.into();
        Self {
            playback: StreamEngine::new(device_id.clone(), Direction::Playback, ctx.clone()),
            capture: StreamEngine::new(device_id.clone(), Direction::Capture, ctx.clone()),
            device_id,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn engine(&self, direction: Direction) -> &StreamEngine {
        match direction {
            Direction::Playback => &self.playback,
            Direction::Capture => &self.capture,
        }
    }

    pub fn engine_mut(&mut self, direction: Direction) -> &mut StreamEngine {
        match direction {
            Direction::Playback => &mut self.playback,
            Direction::Capture => &mut self.capture,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.playback.state() == SessionState::Idle && self.capture.state() == SessionState::Idle
    }

    pub async fn stop_all(&mut self) {
        self.playback.stop().await;
        self.capture.stop().await;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            device_id: self.device_id.clone(),
            playback: self.playback.stats(),
            capture: self.capture.stats(),
        }
    }
}

/// Session snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub device_id: String,
    pub playback: EngineStats,
    pub capture: EngineStats,
}

type SessionHandle = Arc<Mutex<StreamSession>>;

/// All live sessions, keyed by device id
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    ctx: EngineContext,
}

impl SessionRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            sessions: DashMap::new(),
            ctx,
        }
    }

    fn get_or_create(&self, device_id: &str) -> SessionHandle {
        self.sessions
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(StreamSession::new(device_id, &self.ctx))))
            .clone()
    }

    fn get(&self, device_id: &str) -> Option<SessionHandle> {
        self.sessions.get(device_id).map(|s| s.value().clone())
    }

    /// Whether `session` is still the one registered for `device_id`
    fn is_registered(&self, device_id: &str, session: &SessionHandle) -> bool {
        self.sessions
            .get(device_id)
            .map(|s| Arc::ptr_eq(s.value(), session))
            .unwrap_or(false)
    }

    /// Drop the session if both engines are idle and nobody holds it
    fn remove_if_idle(&self, device_id: &str) {
        let removed = self.sessions.remove_if(device_id, |_, session| {
            session.try_lock().map(|s| s.is_idle()).unwrap_or(false)
        });
        if removed.is_some() {
            tracing::debug!("Session for {} removed", device_id);
        }
    }

    /// Start one direction for a device, creating its session on demand
    ///
    /// Starting an active engine is a no-op success.
    pub async fn start(&self, device_id: &str, direction: Direction) -> Result<(), AudioError> {
        loop {
            let session = self.get_or_create(device_id);
            let mut guard = session.lock().await;
            // Removed while we waited for the lock; take the new one
            if !self.is_registered(device_id, &session) {
                continue;
            }

            let result = guard.engine_mut(direction).start();
            let idle = guard.is_idle();
            drop(guard);

            if idle {
                self.remove_if_idle(device_id);
            }
            return result;
        }
    }

    /// Stop one direction; a no-op for unknown devices or idle engines
    pub async fn stop(&self, device_id: &str, direction: Direction) {
        let Some(session) = self.get(device_id) else {
            return;
        };
        let mut guard = session.lock().await;
        guard.engine_mut(direction).stop().await;
        let idle = guard.is_idle();
        drop(guard);

        if idle {
            self.remove_if_idle(device_id);
        }
    }

    /// Stop both directions and tear the session down
    pub async fn stop_device(&self, device_id: &str) {
        let Some(session) = self.get(device_id) else {
            return;
        };
        session.lock().await.stop_all().await;
        self.remove_if_idle(device_id);
    }

    pub async fn shutdown_all(&self) {
        let devices: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for device_id in devices {
            self.stop_device(&device_id).await;
        }
        tracing::info!("All sessions stopped");
    }

    pub async fn state(&self, device_id: &str, direction: Direction) -> SessionState {
        match self.get(device_id) {
            Some(session) => session.lock().await.engine(direction).state(),
            None => SessionState::Idle,
        }
    }

    pub async fn stats(&self, device_id: &str) -> Option<SessionStats> {
        let session = self.get(device_id)?;
        let stats = session.lock().await.stats();
        Some(stats)
    }

    pub async fn all_stats(&self) -> Vec<SessionStats> {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|s| s.value().clone()).collect();
        let mut stats = Vec::with_capacity(handles.len());
        for session in handles {
            stats.push(session.lock().await.stats());
        }
        stats
    }

    /// Log any host stream errors reported since the last check
    pub async fn check_streams(&self) -> usize {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|s| s.value().clone()).collect();
        let mut errors = 0;
        for session in handles {
            let session = session.lock().await;
            for direction in [Direction::Playback, Direction::Capture] {
                if let Some(e) = session.engine(direction).check_stream() {
                    tracing::warn!("{:?} stream for {} reported: {}", direction, session.device_id(), e);
                    errors += 1;
                }
            }
        }
        errors
    }

    pub fn active_devices(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
