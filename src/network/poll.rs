//! Poll scheduler
//!
//! Pulls frames from the transport on a fixed period and feeds them to the
//! jitter buffer. Every failure is soft: it is logged, counted, and the next
//! tick goes ahead as usual.
//!
//! Each poll is awaited before the next tick is taken and missed ticks are
//! skipped, so at most one request is ever in flight.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::audio::buffer::SharedJitterBuffer;
use crate::codec::PcmDecoder;
use crate::error::NetworkError;
use crate::network::transport::SharedTransport;
use crate::protocol::StreamChannel;

/// A sequence number this far behind the last accepted one is taken as a
/// sender restart rather than a stale frame
pub const RESTART_WINDOW: u64 = 64;

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Frame decoded and queued; `evicted` if the buffer dropped its oldest
    Pushed { evicted: bool },
    /// Transport had nothing new
    Empty,
    /// Frame was a duplicate or arrived after a newer one
    Stale,
    TransportFailed,
    DecodeFailed,
}

/// Verdict on one incoming sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    First,
    InOrder,
    /// Accepted, but this many frames went missing before it
    Gap(u64),
    Stale,
    /// New epoch, or far behind the last one: the sender started over
    Restart,
}

/// Tracks the last accepted sequence number of the current sender epoch
#[derive(Debug, Default)]
pub struct SequenceTracker {
    epoch: Option<u64>,
    last: Option<u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, epoch: Option<u64>, seq: u64) -> SequenceCheck {
        let Some(last) = self.last else {
            self.epoch = epoch;
            self.last = Some(seq);
            return SequenceCheck::First;
        };

        if epoch != self.epoch {
            self.epoch = epoch;
            self.last = Some(seq);
            return SequenceCheck::Restart;
        }

        let check = if seq == last.wrapping_add(1) {
            SequenceCheck::InOrder
        } else if seq > last {
            SequenceCheck::Gap(seq - last - 1)
        } else if last - seq < RESTART_WINDOW {
            return SequenceCheck::Stale;
        } else {
            SequenceCheck::Restart
        };
        self.last = Some(seq);
        check
    }

    pub fn reset(&mut self) {
        self.epoch = None;
        self.last = None;
    }
}

#[derive(Debug, Default)]
struct PollCounters {
    polls: AtomicU64,
    frames_pushed: AtomicU64,
    frames_evicted: AtomicU64,
    empty_polls: AtomicU64,
    stale_frames: AtomicU64,
    sequence_gaps: AtomicU64,
    transport_failures: AtomicU64,
    decode_failures: AtomicU64,
    consecutive_failures: AtomicU32,
}

/// Poll statistics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PollStats {
    pub polls: u64,
    pub frames_pushed: u64,
    pub frames_evicted: u64,
    pub empty_polls: u64,
    pub stale_frames: u64,
    pub sequence_gaps: u64,
    pub transport_failures: u64,
    pub decode_failures: u64,
    pub consecutive_failures: u32,
}

/// One device channel's poll-decode-push step
///
/// [`Poller::poll_once`] is the tick handler; the scheduler just calls it
/// on a timer.
pub struct Poller {
    device_id: String,
    channel: StreamChannel,
    transport: SharedTransport,
    buffer: SharedJitterBuffer,
    request_timeout: Duration,
    decoder: Mutex<PcmDecoder>,
    sequence: Mutex<SequenceTracker>,
    counters: PollCounters,
}

impl Poller {
    pub fn new(
        device_id: impl Into<String>,
        channel: StreamChannel,
        transport: SharedTransport,
        buffer: SharedJitterBuffer,
        request_timeout: Duration,
        max_frame_samples: usize,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            channel,
            transport,
            buffer,
            request_timeout,
            decoder: Mutex::new(PcmDecoder::new(max_frame_samples)),
            sequence: Mutex::new(SequenceTracker::new()),
            counters: PollCounters::default(),
        }
    }

    /// Issue one poll and route its result
    pub async fn poll_once(&self) -> PollOutcome {
        self.counters.polls.fetch_add(1, Ordering::Relaxed);

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.transport.poll(&self.device_id, self.channel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout),
        };

        let frame = match result {
            Ok(frame) => {
                self.record_success();
                frame
            }
            Err(NetworkError::InvalidPayload(reason)) => {
                // The relay answered; only the frame it sent is unusable
                self.record_success();
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Discarding undecodable frame for {}/{}: {}",
                    self.device_id,
                    self.channel,
                    reason
                );
                return PollOutcome::DecodeFailed;
            }
            Err(e) => {
                self.record_failure(&e);
                return PollOutcome::TransportFailed;
            }
        };

        let Some(frame) = frame.filter(|f| !f.is_empty()) else {
            self.counters.empty_polls.fetch_add(1, Ordering::Relaxed);
            return PollOutcome::Empty;
        };

        let decoded = self.decoder.lock().decode(&frame.bytes, frame.sequence);
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Discarding undecodable frame for {}/{}: {}",
                    self.device_id,
                    self.channel,
                    e
                );
                return PollOutcome::DecodeFailed;
            }
        };

        if let Some(seq) = decoded.sequence() {
            match self.sequence.lock().observe(frame.epoch, seq) {
                SequenceCheck::Stale => {
                    self.counters.stale_frames.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Dropping stale frame {} for {}", seq, self.device_id);
                    return PollOutcome::Stale;
                }
                SequenceCheck::Gap(missing) => {
                    self.counters.sequence_gaps.fetch_add(missing, Ordering::Relaxed);
                    tracing::debug!("{} frames missing before {} for {}", missing, seq, self.device_id);
                }
                SequenceCheck::Restart => {
                    tracing::info!("Sender for {} restarted at sequence {}", self.device_id, seq);
                }
                SequenceCheck::First | SequenceCheck::InOrder => {}
            }
        }

        let evicted = self.buffer.push(decoded).is_some();
        self.counters.frames_pushed.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.counters.frames_evicted.fetch_add(1, Ordering::Relaxed);
        }
        PollOutcome::Pushed { evicted }
    }

    fn record_success(&self) {
        let failures = self.counters.consecutive_failures.swap(0, Ordering::Relaxed);
        if failures > 0 {
            tracing::info!(
                "Polling {}/{} recovered after {} failures",
                self.device_id,
                self.channel,
                failures
            );
        }
    }

    fn record_failure(&self, err: &NetworkError) {
        self.counters.transport_failures.fetch_add(1, Ordering::Relaxed);
        let failures = self.counters.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == 1 {
            tracing::warn!("Poll failed for {}/{}: {}", self.device_id, self.channel, err);
        } else {
            tracing::debug!("Poll failed for {}/{} ({} in a row): {}", self.device_id, self.channel, failures, err);
        }
    }

    /// Forget the last sequence number, e.g. after the buffer was cleared
    pub fn reset_sequence(&self) {
        self.sequence.lock().reset();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.counters.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn buffer(&self) -> &SharedJitterBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> PollStats {
        let c = &self.counters;
        PollStats {
            polls: c.polls.load(Ordering::Relaxed),
            frames_pushed: c.frames_pushed.load(Ordering::Relaxed),
            frames_evicted: c.frames_evicted.load(Ordering::Relaxed),
            empty_polls: c.empty_polls.load(Ordering::Relaxed),
            stale_frames: c.stale_frames.load(Ordering::Relaxed),
            sequence_gaps: c.sequence_gaps.load(Ordering::Relaxed),
            transport_failures: c.transport_failures.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            consecutive_failures: c.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

/// Poll periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub live: Duration,
    pub fallback: Duration,
    /// Consecutive failures before slowing to `fallback`; 0 never slows down
    pub backoff_after_failures: u32,
}

impl PollSchedule {
    fn period_for(&self, consecutive_failures: u32) -> Duration {
        if self.backoff_after_failures > 0 && consecutive_failures >= self.backoff_after_failures {
            self.fallback
        } else {
            self.live
        }
    }
}

/// Timer driving a [`Poller`]
pub struct PollScheduler {
    poller: Arc<Poller>,
    schedule: PollSchedule,
    handle: Option<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn new(poller: Arc<Poller>, schedule: PollSchedule) -> Self {
        Self {
            poller,
            schedule,
            handle: None,
        }
    }

    /// Spawn the poll loop; a no-op if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let poller = self.poller.clone();
        let schedule = self.schedule;
        self.handle = Some(tokio::spawn(run_schedule(poller, schedule)));
        tracing::debug!("Poll scheduler started ({:?})", self.schedule.live);
    }

    /// Stop the loop and wait until it has exited
    ///
    /// Once this returns no further frame will be pushed. A no-op if the
    /// scheduler is not running.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            tracing::debug!("Poll scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn ticker(period: Duration, start: Instant) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_schedule(poller: Arc<Poller>, schedule: PollSchedule) {
    let mut period = schedule.live;
    let mut interval = ticker(period, Instant::now());

    loop {
        interval.tick().await;
        poller.poll_once().await;

        let wanted = schedule.period_for(poller.consecutive_failures());
        if wanted != period {
            tracing::info!("Poll period for {} now {:?}", poller.device_id, wanted);
            period = wanted;
            interval = ticker(period, Instant::now() + period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;
    use crate::codec::encode_samples;
    use crate::network::loopback::LoopbackTransport;
    use crate::network::transport::Transport;
    use crate::protocol::EncodedFrame;
    use crate::relay::store::RelayStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;

    type Scripted = Result<Option<EncodedFrame>, NetworkError>;

    /// Replays a fixed list of poll results, then reports empty
    struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Self::with_delay(script, Duration::ZERO)
        }

        fn with_delay(script: Vec<Scripted>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                delay,
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn upload(&self, _: &str, _: StreamChannel, _: EncodedFrame) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn poll(&self, _: &str, _: StreamChannel) -> Result<Option<EncodedFrame>, NetworkError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script.lock().pop_front().unwrap_or(Ok(None))
        }
    }

    fn audio(value: f32, seq: Option<u64>) -> Scripted {
        let bytes = encode_samples(&[value; 8]);
        Ok(Some(match seq {
            Some(seq) => EncodedFrame::with_sequence(bytes, seq),
            None => EncodedFrame::new(bytes),
        }))
    }

    fn poller(transport: Arc<ScriptedTransport>, capacity: usize) -> Poller {
        Poller::new(
            "dev",
            StreamChannel::Microphone,
            transport,
            create_shared_buffer(capacity),
            Duration::from_millis(40),
            4096,
        )
    }

    #[tokio::test]
    async fn test_frame_is_decoded_and_pushed() {
        let poller = poller(ScriptedTransport::new(vec![audio(0.5, None)]), 10);

        assert_eq!(poller.poll_once().await, PollOutcome::Pushed { evicted: false });
        let frame = poller.buffer().pop().unwrap();
        assert_eq!(frame.samples(), &[0.5; 8]);
    }

    #[tokio::test]
    async fn test_empty_payload_is_noop() {
        let poller = poller(
            ScriptedTransport::new(vec![Ok(None), Ok(Some(EncodedFrame::new(Bytes::new())))]),
            10,
        );

        assert_eq!(poller.poll_once().await, PollOutcome::Empty);
        assert_eq!(poller.poll_once().await, PollOutcome::Empty);
        assert!(poller.buffer().is_empty());
        assert_eq!(poller.stats().empty_polls, 2);
        assert_eq!(poller.stats().transport_failures, 0);
    }

    #[tokio::test]
    async fn test_failure_then_success_resumes_delivery() {
        let poller = poller(
            ScriptedTransport::new(vec![
                Err(NetworkError::RequestFailed("connection reset".into())),
                audio(0.25, None),
            ]),
            10,
        );

        assert_eq!(poller.poll_once().await, PollOutcome::TransportFailed);
        assert_eq!(poller.consecutive_failures(), 1);
        assert!(poller.buffer().is_empty());

        assert_eq!(poller.poll_once().await, PollOutcome::Pushed { evicted: false });
        assert_eq!(poller.consecutive_failures(), 0);
        assert_eq!(poller.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_discarded() {
        let bad = Ok(Some(EncodedFrame::new(Bytes::from_static(&[1, 2, 3]))));
        let poller = poller(ScriptedTransport::new(vec![bad, audio(0.1, None)]), 10);

        assert_eq!(poller.poll_once().await, PollOutcome::DecodeFailed);
        assert!(poller.buffer().is_empty());
        assert_eq!(poller.poll_once().await, PollOutcome::Pushed { evicted: false });
        assert_eq!(poller.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_slow_transport_times_out() {
        let transport = ScriptedTransport::with_delay(vec![audio(0.1, None)], Duration::from_millis(200));
        let poller = poller(transport, 10);

        assert_eq!(poller.poll_once().await, PollOutcome::TransportFailed);
        assert!(poller.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_stale_and_duplicate_frames_dropped() {
        let poller = poller(
            ScriptedTransport::new(vec![
                audio(0.1, Some(5)),
                audio(0.2, Some(5)),
                audio(0.3, Some(4)),
                audio(0.4, Some(8)),
            ]),
            10,
        );

        assert!(matches!(poller.poll_once().await, PollOutcome::Pushed { .. }));
        assert_eq!(poller.poll_once().await, PollOutcome::Stale);
        assert_eq!(poller.poll_once().await, PollOutcome::Stale);
        assert!(matches!(poller.poll_once().await, PollOutcome::Pushed { .. }));

        let stats = poller.stats();
        assert_eq!(stats.stale_frames, 2);
        assert_eq!(stats.sequence_gaps, 2);
        assert_eq!(poller.buffer().len(), 2);
    }

    #[tokio::test]
    async fn test_overflow_reports_eviction() {
        let poller = poller(
            ScriptedTransport::new(vec![audio(0.1, None), audio(0.2, None)]),
            1,
        );
        assert_eq!(poller.poll_once().await, PollOutcome::Pushed { evicted: false });
        assert_eq!(poller.poll_once().await, PollOutcome::Pushed { evicted: true });
        assert_eq!(poller.buffer().pop().unwrap().samples()[0], 0.2);
    }

    #[test]
    fn test_sequence_tracker() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(None, 10), SequenceCheck::First);
        assert_eq!(tracker.observe(None, 11), SequenceCheck::InOrder);
        assert_eq!(tracker.observe(None, 14), SequenceCheck::Gap(2));
        assert_eq!(tracker.observe(None, 14), SequenceCheck::Stale);
        assert_eq!(tracker.observe(None, 12), SequenceCheck::Stale);
        assert_eq!(tracker.observe(None, 15), SequenceCheck::InOrder);

        let mut tracker = SequenceTracker::new();
        tracker.observe(None, 1_000);
        assert_eq!(tracker.observe(None, 0), SequenceCheck::Restart);
        assert_eq!(tracker.observe(None, 1), SequenceCheck::InOrder);
    }

    #[test]
    fn test_new_epoch_restarts_numbering() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(Some(1), 7), SequenceCheck::First);
        assert_eq!(tracker.observe(Some(1), 3), SequenceCheck::Stale);
        assert_eq!(tracker.observe(Some(2), 0), SequenceCheck::Restart);
        assert_eq!(tracker.observe(Some(2), 1), SequenceCheck::InOrder);
        assert_eq!(tracker.observe(Some(2), 1), SequenceCheck::Stale);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_a_decode_failure() {
        let poller = poller(
            ScriptedTransport::new(vec![
                Err(NetworkError::InvalidPayload("Invalid base64 payload".into())),
                Err(NetworkError::InvalidPayload("Invalid base64 payload".into())),
                audio(0.3, None),
            ]),
            10,
        );

        assert_eq!(poller.poll_once().await, PollOutcome::DecodeFailed);
        assert_eq!(poller.poll_once().await, PollOutcome::DecodeFailed);

        let stats = poller.stats();
        assert_eq!(stats.decode_failures, 2);
        assert_eq!(stats.transport_failures, 0);
        assert_eq!(poller.consecutive_failures(), 0);
        assert_eq!(poller.poll_once().await, PollOutcome::Pushed { evicted: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_backs_off_during_outage_and_recovers() {
        let store = Arc::new(RelayStore::new(10));
        let transport = Arc::new(LoopbackTransport::new(store));
        transport.set_offline(true);

        let poller = Arc::new(Poller::new(
            "dev",
            StreamChannel::Microphone,
            transport.clone(),
            create_shared_buffer(10),
            Duration::from_millis(5),
            4096,
        ));
        let mut scheduler = PollScheduler::new(
            poller.clone(),
            PollSchedule {
                live: Duration::from_millis(10),
                fallback: Duration::from_millis(40),
                backoff_after_failures: 3,
            },
        );
        scheduler.start();

        // Three live polls fail, then one poll every 40 ms
        tokio::time::sleep(Duration::from_millis(400)).await;
        let outage_polls = poller.stats().polls;
        assert!((8..=16).contains(&outage_polls), "{} polls during outage", outage_polls);
        assert!(poller.consecutive_failures() >= 3);

        transport.set_offline(false);
        tokio::time::sleep(Duration::from_millis(400)).await;
        let recovered_polls = poller.stats().polls - outage_polls;
        assert!(recovered_polls >= 30, "{} polls after recovery", recovered_polls);
        assert_eq!(poller.consecutive_failures(), 0);

        scheduler.stop().await;
    }

    #[test]
    fn test_backoff_period() {
        let schedule = PollSchedule {
            live: Duration::from_millis(50),
            fallback: Duration::from_millis(100),
            backoff_after_failures: 3,
        };
        assert_eq!(schedule.period_for(2), Duration::from_millis(50));
        assert_eq!(schedule.period_for(3), Duration::from_millis(100));

        let never = PollSchedule {
            backoff_after_failures: 0,
            ..schedule
        };
        assert_eq!(never.period_for(1_000), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_scheduler_start_stop_idempotent() {
        let script = (0..1_000).map(|i| audio(i as f32, None)).collect();
        let poller = Arc::new(poller(ScriptedTransport::new(script), 10));
        let mut scheduler = PollScheduler::new(
            poller.clone(),
            PollSchedule {
                live: Duration::from_millis(5),
                fallback: Duration::from_millis(10),
                backoff_after_failures: 3,
            },
        );

        scheduler.stop().await;
        assert!(!scheduler.is_running());

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        let polls = poller.stats().polls;
        assert!(polls > 0);
        assert!(poller.buffer().len() <= 10);

        // Nothing is pushed once stop has returned
        poller.buffer().clear();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(poller.buffer().is_empty());
        assert_eq!(poller.stats().polls, polls);
    }
}
