//! Stream engine
//!
//! One engine type serves both directions. A playback engine owns a jitter
//! buffer fed by a poll scheduler and drained by the host output callback.
//! A capture engine wires the host input callback to a capture encoder and
//! an upload worker.
//!
//! State machine: `Idle → Starting → Active → Stopping → Idle`.

use serde::Serialize;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::buffer::{create_shared_buffer, JitterBufferStats, SharedJitterBuffer};
use crate::audio::capture::{CaptureEncoder, CaptureStats, CaptureStatsHandle};
use crate::audio::host::{AudioHost, HostStream, HostStreamConfig};
use crate::audio::playback::{DrainStats, PlaybackDrain};
use crate::config::StreamConfig;
use crate::error::AudioError;
use crate::network::poll::{PollSchedule, PollScheduler, PollStats, Poller};
use crate::network::transport::SharedTransport;
use crate::network::upload::{UploadStats, UploadWorker};
use crate::protocol::StreamChannel;

/// Which way audio flows through an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host input → relay
    Capture,
    /// Relay → host output
    Playback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Everything an engine needs besides its device id and direction
#[derive(Clone)]
pub struct EngineContext {
    pub host: Arc<dyn AudioHost>,
    pub transport: SharedTransport,
    pub stream: StreamConfig,
    pub request_timeout: Duration,
}

impl EngineContext {
    fn host_config(&self) -> HostStreamConfig {
        HostStreamConfig {
            sample_rate: self.stream.sample_rate,
            quantum: self.stream.quantum,
        }
    }

    fn schedule(&self) -> PollSchedule {
        PollSchedule {
            live: self.stream.poll_interval(),
            fallback: self.stream.fallback_poll_interval(),
            backoff_after_failures: self.stream.backoff_after_failures,
        }
    }
}

enum Running {
    Playback {
        stream: Box<dyn HostStream>,
        scheduler: PollScheduler,
        drain: Arc<PlaybackDrain>,
    },
    Capture {
        stream: Box<dyn HostStream>,
        uploader: UploadWorker,
        capture: CaptureStatsHandle,
    },
}

/// Engine snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub direction: Direction,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer: Option<JitterBufferStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain: Option<DrainStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<CaptureStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadStats>,
}

pub struct StreamEngine {
    device_id: String,
    direction: Direction,
    ctx: EngineContext,
    /// Present for playback engines only
    buffer: Option<SharedJitterBuffer>,
    /// Next capture sequence number, kept across restarts
    capture_sequence: Arc<AtomicU64>,
    /// Tags every captured frame so listeners can tell engines apart
    epoch: u64,
    state: SessionState,
    running: Option<Running>,
}

impl StreamEngine {
    pub fn new(device_id: impl Into<String>, direction: Direction, ctx: EngineContext) -> Self {
        let buffer = match direction {
            Direction::Playback => Some(create_shared_buffer(ctx.stream.jitter_capacity)),
            Direction::Capture => None,
        };
        Self {
            device_id: device_id.into(),
            direction,
            ctx,
            buffer,
            capture_sequence: Arc::new(AtomicU64::new(0)),
            epoch: uuid::Uuid::new_v4().as_u64_pair().0,
            state: SessionState::Idle,
            running: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn buffer(&self) -> Option<&SharedJitterBuffer> {
        self.buffer.as_ref()
    }

    /// Channel on the relay this engine reads or writes
    pub fn channel(&self) -> StreamChannel {
        match self.direction {
            Direction::Playback => self.ctx.stream.playback_channel,
            Direction::Capture => self.ctx.stream.capture_channel,
        }
    }

    /// Acquire host audio and start the background task
    ///
    /// A no-op when already active. Any failure leaves the engine idle and
    /// is reported as [`AudioError::ResourceUnavailable`]. Must be called
    /// from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.state == SessionState::Active {
            return Ok(());
        }

        self.state = SessionState::Starting;
        let started = match self.direction {
            Direction::Playback => self.start_playback(),
            Direction::Capture => self.start_capture(),
        };

        match started {
            Ok(running) => {
                self.running = Some(running);
                self.state = SessionState::Active;
                tracing::info!(
                    "{:?} started for {} on {} ({} channel)",
                    self.direction,
                    self.device_id,
                    self.ctx.host.name(),
                    self.channel()
                );
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                tracing::warn!("{:?} for {} could not start: {}", self.direction, self.device_id, e);
                Err(match e {
                    AudioError::ResourceUnavailable(_) => e,
                    other => AudioError::ResourceUnavailable(other.to_string()),
                })
            }
        }
    }

    fn start_playback(&self) -> Result<Running, AudioError> {
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| AudioError::StreamError("playback engine has no buffer".into()))?;

        self.ctx.host.resume()?;

        let drain = Arc::new(PlaybackDrain::new(buffer.clone()));
        let render = drain.clone();
        let stream = self.ctx.host.open_output(
            self.ctx.host_config(),
            Box::new(move |out: &mut [f32]| {
                render.render(out);
            }),
        )?;

        let poller = Arc::new(Poller::new(
            self.device_id.clone(),
            self.channel(),
            self.ctx.transport.clone(),
            buffer,
            self.ctx.request_timeout,
            self.ctx.stream.max_frame_samples,
        ));
        let mut scheduler = PollScheduler::new(poller, self.ctx.schedule());
        scheduler.start();

        Ok(Running::Playback {
            stream,
            scheduler,
            drain,
        })
    }

    fn start_capture(&self) -> Result<Running, AudioError> {
        let (tx, rx) = mpsc::channel(self.ctx.stream.upload_queue_capacity.max(1));
        let encoder = CaptureEncoder::continuing(tx, self.capture_sequence.clone(), Some(self.epoch));
        let capture = encoder.stats_handle();

        let stream = self.ctx.host.open_input(
            self.ctx.host_config(),
            Box::new(move |block: &[f32]| {
                encoder.on_input(block);
            }),
        )?;

        let uploader = UploadWorker::spawn(
            self.device_id.clone(),
            self.channel(),
            self.ctx.transport.clone(),
            rx,
            self.ctx.request_timeout,
        );

        Ok(Running::Capture {
            stream,
            uploader,
            capture,
        })
    }

    /// Release host audio, stop the background task, drain the buffer
    ///
    /// A no-op when idle. Once this returns the buffer is empty and stays
    /// empty.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.state = SessionState::Stopping;

        match running {
            Running::Playback {
                stream,
                mut scheduler,
                drain,
            } => {
                drop(stream);
                scheduler.stop().await;
                let cleared = drain.buffer().clear();
                tracing::debug!("Discarded {} buffered frames for {}", cleared, self.device_id);
            }
            Running::Capture {
                stream,
                mut uploader,
                ..
            } => {
                drop(stream);
                uploader.stop().await;
            }
        }

        self.state = SessionState::Idle;
        tracing::info!("{:?} stopped for {}", self.direction, self.device_id);
    }

    /// Asynchronous error reported by the host stream, if any
    pub fn check_stream(&self) -> Option<AudioError> {
        match self.running.as_ref()? {
            Running::Playback { stream, .. } | Running::Capture { stream, .. } => stream.check_errors(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            direction: self.direction,
            state: self.state,
            buffer: self.buffer.as_ref().map(|b| b.stats()),
            poll: None,
            drain: None,
            capture: None,
            upload: None,
        };

        match &self.running {
            Some(Running::Playback { scheduler, drain, .. }) => {
                stats.poll = Some(scheduler.poller().stats());
                stats.drain = Some(drain.stats());
            }
            Some(Running::Capture { uploader, capture, .. }) => {
                stats.capture = Some(capture.stats());
                stats.upload = Some(uploader.stats());
            }
            None => {}
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::host::ManualHost;
    use crate::codec::{decode_samples, encode_samples};
    use crate::audio::buffer::create_shared_buffer;
    use crate::network::loopback::LoopbackTransport;
    use crate::network::poll::PollOutcome;
    use crate::protocol::EncodedFrame;
    use crate::relay::store::RelayStore;

    const QUANTUM: usize = 8;

    struct Rig {
        host: ManualHost,
        transport: Arc<LoopbackTransport>,
        store: Arc<RelayStore>,
    }

    impl Rig {
        fn new() -> Self {
            let store = Arc::new(RelayStore::new(10));
            Self {
                host: ManualHost::new(),
                transport: Arc::new(LoopbackTransport::new(store.clone())),
                store,
            }
        }

        fn engine(&self, direction: Direction) -> StreamEngine {
            let ctx = EngineContext {
                host: Arc::new(self.host.clone()),
                transport: self.transport.clone(),
                stream: StreamConfig {
                    quantum: QUANTUM,
                    poll_interval_ms: 5,
                    fallback_poll_interval_ms: 10,
                    ..StreamConfig::default()
                },
                request_timeout: Duration::from_millis(50),
            };
            StreamEngine::new("dev", direction, ctx)
        }

        fn send_to_device(&self, samples: &[f32]) {
            self.store.upload(
                "dev",
                StreamChannel::Microphone,
                EncodedFrame::new(encode_samples(samples)),
            );
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let rig = Rig::new();
        let mut engine = rig.engine(Direction::Playback);

        engine.stop().await;
        assert_eq!(engine.state(), SessionState::Idle);

        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_active());
        assert!(rig.host.output_open());
        assert_eq!(rig.host.resume_count(), 1);

        engine.stop().await;
        engine.stop().await;
        assert_eq!(engine.state(), SessionState::Idle);
        assert!(!rig.host.output_open());
    }

    #[tokio::test]
    async fn test_unavailable_host_leaves_engine_idle() {
        let rig = Rig::new();
        rig.host.set_available(false);

        for direction in [Direction::Playback, Direction::Capture] {
            let mut engine = rig.engine(direction);
            let err = engine.start().unwrap_err();
            assert!(matches!(err, AudioError::ResourceUnavailable(_)));
            assert_eq!(engine.state(), SessionState::Idle);
            assert!(engine.stats().poll.is_none());
        }
        assert!(!rig.host.output_open());
        assert!(!rig.host.input_open());
    }

    #[tokio::test]
    async fn test_playback_renders_relay_audio_then_silence() {
        let rig = Rig::new();
        let mut engine = rig.engine(Direction::Playback);
        engine.start().unwrap();

        rig.send_to_device(&[0.5; 4]);
        let buffer = engine.buffer().unwrap().clone();
        wait_for(|| !buffer.is_empty()).await;

        let block = rig.host.request_output().unwrap();
        assert_eq!(block, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);

        let block = rig.host.request_output().unwrap();
        assert_eq!(block, vec![0.0; QUANTUM]);

        let stats = engine.stats();
        assert_eq!(stats.drain.unwrap().underruns, 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_buffer_and_halts_polling() {
        let rig = Rig::new();
        let mut engine = rig.engine(Direction::Playback);
        engine.start().unwrap();

        for i in 0..3 {
            rig.send_to_device(&[i as f32; QUANTUM]);
        }
        let buffer = engine.buffer().unwrap().clone();
        wait_for(|| buffer.len() == 3).await;

        engine.stop().await;
        assert!(buffer.is_empty());

        rig.send_to_device(&[1.0; QUANTUM]);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(buffer.is_empty());
        assert_eq!(rig.store.pending("dev", StreamChannel::Microphone), 1);
    }

    #[tokio::test]
    async fn test_polling_survives_outage() {
        let rig = Rig::new();
        rig.transport.set_offline(true);

        let mut engine = rig.engine(Direction::Playback);
        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(engine.stats().poll.unwrap().transport_failures > 0);
        assert!(engine.is_active());

        rig.transport.set_offline(false);
        rig.send_to_device(&[0.75; QUANTUM]);
        let buffer = engine.buffer().unwrap().clone();
        wait_for(|| !buffer.is_empty()).await;

        assert_eq!(rig.host.request_output().unwrap(), vec![0.75; QUANTUM]);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_capture_uploads_each_block() {
        let rig = Rig::new();
        let mut engine = rig.engine(Direction::Capture);
        assert!(engine.buffer().is_none());
        engine.start().unwrap();
        assert!(rig.host.input_open());

        assert!(rig.host.deliver_input(&[0.1; QUANTUM]));
        assert!(rig.host.deliver_input(&[0.2; QUANTUM]));
        wait_for(|| rig.store.pending("dev", StreamChannel::Speaker) == 2).await;

        let first = rig.store.download("dev", StreamChannel::Speaker).unwrap();
        assert_eq!(first.sequence, Some(0));
        assert_eq!(decode_samples(&first.bytes).unwrap(), vec![0.1; QUANTUM]);

        let stats = engine.stats();
        assert_eq!(stats.capture.unwrap().frames_encoded, 2);
        assert_eq!(stats.upload.unwrap().uploaded, 2);

        engine.stop().await;
        assert!(!rig.host.input_open());
        assert!(!rig.host.deliver_input(&[0.3; QUANTUM]));
    }

    #[tokio::test]
    async fn test_capture_restart_keeps_listener_in_order() {
        let rig = Rig::new();
        let mut engine = rig.engine(Direction::Capture);
        let listener = Poller::new(
            "dev",
            StreamChannel::Speaker,
            rig.transport.clone(),
            create_shared_buffer(10),
            Duration::from_millis(50),
            4096,
        );

        engine.start().unwrap();
        for _ in 0..3 {
            assert!(rig.host.deliver_input(&[0.1; QUANTUM]));
        }
        wait_for(|| rig.store.pending("dev", StreamChannel::Speaker) == 3).await;
        for _ in 0..3 {
            assert_eq!(listener.poll_once().await, PollOutcome::Pushed { evicted: false });
        }
        engine.stop().await;

        engine.start().unwrap();
        for _ in 0..2 {
            assert!(rig.host.deliver_input(&[0.2; QUANTUM]));
        }
        wait_for(|| rig.store.pending("dev", StreamChannel::Speaker) == 2).await;
        assert_eq!(listener.poll_once().await, PollOutcome::Pushed { evicted: false });
        assert_eq!(listener.poll_once().await, PollOutcome::Pushed { evicted: false });
        engine.stop().await;

        // Numbering carried on from 3 instead of starting over
        let stats = listener.stats();
        assert_eq!(stats.frames_pushed, 5);
        assert_eq!(stats.stale_frames, 0);
        assert_eq!(stats.sequence_gaps, 0);
    }

    #[tokio::test]
    async fn test_listener_follows_a_new_engine() {
        let rig = Rig::new();
        let listener = Poller::new(
            "dev",
            StreamChannel::Speaker,
            rig.transport.clone(),
            create_shared_buffer(10),
            Duration::from_millis(50),
            4096,
        );

        for _ in 0..2 {
            let mut engine = rig.engine(Direction::Capture);
            engine.start().unwrap();
            for _ in 0..3 {
                assert!(rig.host.deliver_input(&[0.3; QUANTUM]));
            }
            wait_for(|| rig.store.pending("dev", StreamChannel::Speaker) == 3).await;
            for _ in 0..3 {
                assert_eq!(listener.poll_once().await, PollOutcome::Pushed { evicted: false });
            }
            engine.stop().await;
        }

        let stats = listener.stats();
        assert_eq!(stats.frames_pushed, 6);
        assert_eq!(stats.stale_frames, 0);
    }
}
