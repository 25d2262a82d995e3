//! Per-call state machine: glues the capture path, the ring buffers, the
//! transport, and playback injection together, and owns everything that
//! must be serialized between the host's capture thread and the
//! transport's callback thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::buffer::{ControlQueue, Priority, RingFrameBuffer};
use crate::codec::{encode_pcm16_to_ulaw, AudioCodec, BandLimitedResampler, Resampler};
use crate::events::{EventEmitter, HostEvent};
use crate::protocol_constants::HEARTBEAT_INTERVAL_SECS;
use crate::runtime::TaskSpawner;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::session::playback::PlaybackInjector;
use crate::transport::{Direction, TransportState, WsClient};
use crate::wire::{MediaBody, MediaMessage, StopBody, StopMessage};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Everything needed to construct one [`SessionEngine`].
pub struct SessionParams {
    pub stream_id: String,
    pub call_id: String,
    pub direction: Direction,
    pub codec: AudioCodec,
    pub call_rate: u32,
    pub wire_rate: u32,
    pub bidirectional: bool,
    pub timeout_secs: u64,
    pub buffer_secs: u64,
    pub metadata: Option<String>,
}

/// The per-call state machine described by the component design. Capture
/// frames come in on one thread; transport callbacks run on another; the
/// `capture_lock` ensures at most one of each runs against the buffers at
/// a time, with capture skipping the frame under contention rather than
/// blocking the host's real-time audio thread.
pub struct SessionEngine<S: TaskSpawner + Clone + 'static> {
    pub stream_id: String,
    call_id: String,
    direction: Direction,
    codec: AudioCodec,
    call_rate: u32,
    wire_rate: u32,
    metadata: Option<String>,

    sequence: AtomicU64,
    paused: AtomicBool,
    stopped: AtomicBool,
    invalid_input_notified: AtomicBool,

    capture_lock: Mutex<()>,
    inbound: RingFrameBuffer,
    outbound: Option<RingFrameBuffer>,
    resampler: Mutex<Option<BandLimitedResampler>>,

    pub transport: Arc<WsClient>,
    pub control: Arc<ControlQueue>,
    pub playback: Option<Arc<PlaybackInjector>>,

    emitter: Arc<dyn EventEmitter>,
    scheduler: Scheduler<S>,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl<S: TaskSpawner + Clone + 'static> SessionEngine<S> {
    #[must_use]
    pub fn new(
        params: SessionParams,
        emitter: Arc<dyn EventEmitter>,
        scheduler: Scheduler<S>,
    ) -> Self {
        let chunk_size = params.codec.wire_frame_bytes(params.wire_rate);
        let inbound = RingFrameBuffer::new(params.stream_id.clone(), chunk_size, params.buffer_secs);
        let outbound = (params.direction == Direction::Both).then(|| {
            RingFrameBuffer::new(params.stream_id.clone(), chunk_size, params.buffer_secs)
        });
        let playback = params
            .bidirectional
            .then(|| Arc::new(PlaybackInjector::new(params.call_rate)));

        Self {
            stream_id: params.stream_id,
            call_id: params.call_id,
            direction: params.direction,
            codec: params.codec,
            call_rate: params.call_rate,
            wire_rate: params.wire_rate,
            metadata: params.metadata,
            sequence: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            invalid_input_notified: AtomicBool::new(false),
            capture_lock: Mutex::new(()),
            inbound,
            outbound,
            resampler: Mutex::new(None),
            transport: Arc::new(WsClient::new(params.direction)),
            control: Arc::new(ControlQueue::new()),
            playback,
            emitter,
            scheduler,
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn wire_rate(&self) -> u32 {
        self.wire_rate
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    #[must_use]
    pub fn inbound_buffer(&self) -> &RingFrameBuffer {
        &self.inbound
    }

    #[must_use]
    pub fn outbound_buffer(&self) -> Option<&RingFrameBuffer> {
        self.outbound.as_ref()
    }

    /// Starts the transport and arms the heartbeat and stream-end timeout
    /// tasks. No-op if already started.
    pub fn start(self: &Arc<Self>, timeout_secs: u64) {
        if !self.transport.start() {
            return;
        }
        self.arm_heartbeat();
        if timeout_secs > 0 {
            self.arm_timeout(timeout_secs);
        }
    }

    fn arm_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = self.scheduler.schedule_periodic(
            Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            move || {
                if let Some(session) = weak.upgrade() {
                    session.emitter.emit(HostEvent::StreamHeartbeat {
                        stream_id: session.stream_id.clone(),
                        timestamp: now_millis(),
                    });
                }
            },
        );
        self.tasks.lock().push(handle);
    }

    fn arm_timeout(self: &Arc<Self>, timeout_secs: u64) {
        let weak = Arc::downgrade(self);
        let handle = self
            .scheduler
            .schedule_once(Duration::from_secs(timeout_secs), move || {
                if let Some(session) = weak.upgrade() {
                    session.graceful_shutdown("TIMEOUT REACHED".to_string());
                }
            });
        self.tasks.lock().push(handle);
    }

    /// Sets the pause flag. Capture frames are dropped (but accepted) until
    /// [`Self::resume`]. No buffer flush: stale audio simply ages out on
    /// ring overflow once capture resumes.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Requests a graceful shutdown with the given reason. The writable
    /// loop observes this and drains buffers before sending `stop`.
    pub fn graceful_shutdown(&self, reason: String) {
        self.transport.graceful_shutdown();
        self.emitter.emit(HostEvent::StreamStopped {
            stream_id: self.stream_id.clone(),
            reason,
            timestamp: now_millis(),
        });
    }

    /// Cancels every scheduled task owned by this session. Called exactly
    /// once during cleanup, regardless of how cleanup was entered.
    pub fn cancel_scheduled_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.cancel();
        }
    }

    /// Capture path: invoked by the host once per 20ms frame of raw PCM16.
    /// Accepts and silently discards the frame (returning `true`, so the
    /// host does not tear down the media bug) whenever paused, shutting
    /// down, not connected, or the session mutex is contended.
    pub fn capture_frame(&self, pcm: &[i16]) -> bool {
        if self.stopped.load(Ordering::SeqCst)
            || self.paused.load(Ordering::SeqCst)
            || self.transport.is_graceful_shutdown()
        {
            return true;
        }
        if self.transport.state() != TransportState::Connected {
            return true;
        }
        let Some(_guard) = self.capture_lock.try_lock() else {
            return true;
        };

        let target_buffer = match self.direction {
            Direction::Outbound => return true, // capture only feeds inbound/both
            Direction::Inbound | Direction::Both => &self.inbound,
        };

        let owned;
        let samples: &[i16] = if self.wire_rate != self.call_rate {
            let mut resampler = self.resampler.lock();
            let resampler = resampler.get_or_insert_with(BandLimitedResampler::default);
            let mut out = Vec::new();
            resampler.process(pcm, self.call_rate, self.wire_rate, &mut out);
            owned = out;
            &owned
        } else {
            pcm
        };

        let wire_bytes: Vec<u8> = match self.codec {
            AudioCodec::Pcm16 => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            AudioCodec::Ulaw => {
                let pcm_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                encode_pcm16_to_ulaw(&pcm_bytes)
            }
        };

        match target_buffer.write(&wire_bytes) {
            Ok(Some(signal)) => {
                self.emitter.emit(HostEvent::ConnectionDegraded {
                    stream_id: self.stream_id.clone(),
                    milestone: signal.milestone,
                    timestamp: now_millis(),
                });
            }
            Ok(None) => {}
            Err(_) => {
                self.emitter.emit(HostEvent::StreamBufferOverrun {
                    stream_id: self.stream_id.clone(),
                    timestamp: now_millis(),
                });
            }
        }
        true
    }

    /// Builds the `media` wire message for one frame already read out of
    /// `buffer`, tagged with the direction's track label. `chunk` reports
    /// that buffer's transmitted-chunk count, not a second sequence draw.
    #[must_use]
    pub fn media_message(
        &self,
        track: &'static str,
        buffer: &RingFrameBuffer,
        payload: Vec<u8>,
    ) -> MediaMessage {
        MediaMessage {
            sequence_number: self.next_sequence(),
            stream_id: self.stream_id.clone(),
            event: "media",
            media: MediaBody {
                track,
                timestamp: now_millis().to_string(),
                chunk: buffer.transmitted_chunks(),
                payload: crate::wire::encode_base64(&payload),
            },
            extra_headers: None,
        }
    }

    #[must_use]
    pub fn stop_message(&self) -> StopMessage {
        StopMessage {
            sequence_number: self.next_sequence(),
            stream_id: self.stream_id.clone(),
            event: "stop",
            stop: StopBody {
                call_id: self.call_id.clone(),
            },
            extra_headers: None,
        }
    }

    /// Queues a control message for transmission at the given priority.
    pub fn enqueue_control(&self, priority: Priority, message: String) {
        self.control.enqueue(priority, message);
    }

    /// Atomically checks and sets the invalid-input-notified flag. Returns
    /// `true` only the first time it is called for this session, so
    /// `incorrectPayload` is sent at most once per session even if the peer
    /// keeps sending malformed frames.
    pub fn notify_invalid_input_once(&self) -> bool {
        !self.invalid_input_notified.swap(true, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::CountingEventEmitter;
    use crate::runtime::TokioSpawner;

    fn params(direction: Direction) -> SessionParams {
        SessionParams {
            stream_id: "s1".into(),
            call_id: "c1".into(),
            direction,
            codec: AudioCodec::Pcm16,
            call_rate: 8000,
            wire_rate: 8000,
            bidirectional: false,
            timeout_secs: 0,
            buffer_secs: 1,
            metadata: None,
        }
    }

    fn engine(direction: Direction) -> Arc<SessionEngine<TokioSpawner>> {
        let emitter: Arc<dyn EventEmitter> = Arc::new(CountingEventEmitter::new());
        let scheduler = Scheduler::new(TokioSpawner::current());
        Arc::new(SessionEngine::new(params(direction), emitter, scheduler))
    }

    #[tokio::test]
    async fn capture_before_connected_is_discarded_but_reports_success() {
        let session = engine(Direction::Inbound);
        let frame = vec![0i16; 160];
        assert!(session.capture_frame(&frame));
        assert_eq!(session.inbound_buffer().in_use(), 0);
    }

    #[tokio::test]
    async fn capture_writes_frame_once_connected() {
        let session = engine(Direction::Inbound);
        session.transport.start();
        session.transport.on_connect_success();
        let frame = vec![0i16; 160]; // 20ms @ 8kHz mono
        assert!(session.capture_frame(&frame));
        assert_eq!(session.inbound_buffer().in_use(), 320);
    }

    #[tokio::test]
    async fn paused_session_discards_frames() {
        let session = engine(Direction::Inbound);
        session.transport.start();
        session.transport.on_connect_success();
        session.pause();
        let frame = vec![0i16; 160];
        assert!(session.capture_frame(&frame));
        assert_eq!(session.inbound_buffer().in_use(), 0);
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotonic() {
        let session = engine(Direction::Inbound);
        let a = session.next_sequence();
        let b = session.next_sequence();
        assert!(b > a);
    }

    #[tokio::test]
    async fn graceful_shutdown_sets_transport_flag() {
        let session = engine(Direction::Inbound);
        session.graceful_shutdown("bye".into());
        assert!(session.transport.is_graceful_shutdown());
    }
}
