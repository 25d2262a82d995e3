//! Process-wide composition root: owns the session table, the worker
//! pool that drives transport I/O, the process `Config`, and the
//! host-side event publisher.
//!
//! Per the design note on worker dispatch, the four global mutex-protected
//! pending-work lists named in the component design are reimplemented here
//! as one bounded MPSC channel per worker, fed by a round-robin dispatcher
//! — see `DESIGN.md` for the rationale. This mirrors the adopted reference
//! codebase's own composition-root pattern (`bootstrap_services`) more
//! than it mirrors any particular worker-pool crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::buffer::Priority;
use crate::codec::AudioCodec;
use crate::command::{target_from_command, Command};
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::events::{BroadcastEventEmitter, EventEmitter, HostEvent};
use crate::protocol_constants::{FRAME_DURATION_MS, RECONNECT_DELAY_SECS, WORKER_CHANNEL_CAPACITY};
use crate::runtime::TokioSpawner;
use crate::scheduler::Scheduler;
use crate::session::{SessionEngine, SessionParams};
use crate::state::Config;
use crate::transport::{connect, ReceiveAccumulator, TransportState, WritableAction, WsClient, WsTarget};
use crate::wire::{parse_inbound, InboundMessage, MediaFormat, StartBody, StartMessage};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

type Session = SessionEngine<TokioSpawner>;

struct DispatchJob {
    session: Arc<Session>,
    target: WsTarget,
}

/// Process-wide composition root.
pub struct Supervisor {
    config: Config,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    scheduler: Scheduler<TokioSpawner>,
    emitter: Arc<BroadcastEventEmitter>,
    worker_senders: Vec<mpsc::Sender<DispatchJob>>,
    next_worker: AtomicUsize,
    cancel_token: CancellationToken,
}

impl Supervisor {
    /// Starts `config.service_threads` worker tasks and returns the ready
    /// supervisor. Each worker owns one bounded channel of dispatch jobs.
    pub fn new(mut config: Config) -> EngineResult<Self> {
        config.clamp();
        config
            .validate()
            .map_err(EngineError::WorkerPoolInit)?;

        let spawner = TokioSpawner::current();
        let scheduler = Scheduler::new(spawner);
        let emitter = Arc::new(BroadcastEventEmitter::new(config.event_channel_capacity));
        let cancel_token = CancellationToken::new();
        let sessions = Arc::new(DashMap::new());

        let mut worker_senders = Vec::with_capacity(config.service_threads);
        for worker_id in 0..config.service_threads {
            let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
            worker_senders.push(tx);
            spawn_worker(
                worker_id,
                rx,
                Arc::clone(&emitter),
                Arc::clone(&sessions),
                cancel_token.clone(),
            );
        }

        Ok(Self {
            config,
            sessions,
            scheduler,
            emitter,
            worker_senders,
            next_worker: AtomicUsize::new(0),
            cancel_token,
        })
    }

    #[must_use]
    pub fn event_subscriber(&self) -> tokio::sync::broadcast::Receiver<HostEvent> {
        self.emitter.subscribe()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Dispatches one command-surface verb. Returns the `+OK`/`-ERR`
    /// result text; the command's own validation errors are folded into
    /// `-ERR` rather than surfaced to the caller as a typed error, matching
    /// the "exit code 0 either way, body carries the result" convention.
    pub fn dispatch(&self, command: Command) -> &'static str {
        let result = match command {
            Command::Start {
                stream_id,
                call_id,
                direction,
                sample_rate,
                timeout_secs,
                bidirectional,
                metadata,
                target,
            } => self.handle_start(
                stream_id,
                call_id,
                direction,
                sample_rate,
                timeout_secs,
                bidirectional,
                metadata,
                target,
            ),
            Command::Stop { stream_id } => self.handle_stop(&stream_id),
            Command::Pause { stream_id } => self.with_session(&stream_id, |s| s.pause()),
            Command::Resume { stream_id } => self.with_session(&stream_id, |s| s.resume()),
            Command::GracefulShutdown { stream_id, reason } => {
                self.with_session(&stream_id, |s| s.graceful_shutdown(reason.clone()))
            }
            Command::SendText { stream_id, text } => {
                self.with_session(&stream_id, |s| s.enqueue_control(Priority::Normal, text.clone()))
            }
        };
        crate::command::format_result(result.is_ok())
    }

    fn with_session(&self, stream_id: &str, f: impl FnOnce(&Session)) -> Result<(), ConfigError> {
        match self.sessions.get(stream_id) {
            Some(session) => {
                f(&session);
                Ok(())
            }
            None => Err(ConfigError::InvalidUrl(format!("no such session: {stream_id}"))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_start(
        &self,
        stream_id: String,
        call_id: String,
        direction: crate::transport::Direction,
        sample_rate: u32,
        timeout_secs: u64,
        bidirectional: bool,
        metadata: Option<String>,
        url: crate::command::ParsedUrl,
    ) -> Result<(), ConfigError> {
        if self.sessions.contains_key(&stream_id) {
            return Err(ConfigError::DuplicateStreamId(stream_id));
        }

        // Call sample rate is supplied by the telephony platform at
        // media-bug attach time; that attachment API is out of scope here,
        // so the headless harness assumes the base telephony rate.
        let call_rate = crate::protocol_constants::BASE_SAMPLE_RATE_HZ;
        let params = SessionParams {
            stream_id: stream_id.clone(),
            call_id,
            direction,
            codec: AudioCodec::Pcm16,
            call_rate,
            wire_rate: sample_rate,
            bidirectional,
            timeout_secs,
            buffer_secs: self.config.buffer_secs,
            metadata,
        };
        let session = Arc::new(SessionEngine::new(
            params,
            Arc::clone(&self.emitter) as Arc<dyn EventEmitter>,
            self.scheduler.clone(),
        ));
        session.start(timeout_secs);

        let target = target_from_command(
            &url,
            self.config.subprotocol_name.clone(),
            self.config.http_auth.clone(),
            self.config.tls.clone(),
        );

        self.sessions.insert(stream_id, Arc::clone(&session));
        self.assign_to_worker(session, target);
        Ok(())
    }

    fn handle_stop(&self, stream_id: &str) -> Result<(), ConfigError> {
        match self.sessions.get(stream_id) {
            Some(session) => {
                session.graceful_shutdown("stop requested".to_string());
                session.cancel_scheduled_tasks();
                Ok(())
            }
            None => Err(ConfigError::InvalidUrl(format!("no such session: {stream_id}"))),
        }
    }

    fn assign_to_worker(&self, session: Arc<Session>, target: WsTarget) {
        let idx = self.next_worker.fetch_add(1, Ordering::SeqCst) % self.worker_senders.len();
        let sender = self.worker_senders[idx].clone();
        // Best-effort: a full worker channel means that worker is falling
        // behind; dropping the job here surfaces as the session never
        // connecting, which the heartbeat/timeout watchdogs will catch.
        let _ = sender.try_send(DispatchJob { session, target });
    }

    /// Drains every session's graceful-shutdown path, cancels the
    /// scheduler, and stops accepting new work. Worker tasks observe the
    /// cancellation token and exit once their current job completes.
    pub async fn shutdown(self) {
        for entry in self.sessions.iter() {
            entry.value().graceful_shutdown("process shutdown".to_string());
            entry.value().cancel_scheduled_tasks();
        }
        self.scheduler.shutdown();
        self.cancel_token.cancel();
    }
}

fn spawn_worker(
    worker_id: usize,
    mut rx: mpsc::Receiver<DispatchJob>,
    emitter: Arc<BroadcastEventEmitter>,
    sessions: Arc<DashMap<String, Arc<Session>>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    log::info!("transport worker {worker_id} shutting down");
                    break;
                }
                job = rx.recv() => {
                    match job {
                        Some(job) => {
                            let emitter = Arc::clone(&emitter);
                            let sessions = Arc::clone(&sessions);
                            tokio::spawn(drive_session(job.session, job.target, emitter, sessions));
                        }
                        None => break,
                    }
                }
            }
        }
    });
}

/// Owns one session's socket for its entire lifetime: connects, reconnects
/// on failure up to the attempt cap, and loops the writable-step policy on
/// a pacing tick alongside reading inbound frames. Removes the session from
/// the shared table on every terminal path — this is the table's sole
/// writer for removals, matching the "tear-down removes the entry" rule.
#[tracing::instrument(skip(session, target, emitter, sessions), fields(stream_id = %session.stream_id))]
async fn drive_session(
    session: Arc<Session>,
    target: WsTarget,
    emitter: Arc<BroadcastEventEmitter>,
    sessions: Arc<DashMap<String, Arc<Session>>>,
) {
    loop {
        let attempt = session.transport.attempts();
        let span = tracing::info_span!("connect_attempt", attempt);
        let connect_result = connect(&target).instrument(span.clone()).await;
        match connect_result {
            Ok(stream) => {
                let _entered = span.enter();
                tracing::info!("connected");
                if session.transport.on_connect_success() {
                    emitter.emit(HostEvent::ConnectionEstablished {
                        stream_id: session.stream_id.clone(),
                        timestamp: now_millis(),
                    });
                }
                emitter.emit(HostEvent::StreamStarted {
                    stream_id: session.stream_id.clone(),
                    server_url: target.url.clone(),
                    timestamp: now_millis(),
                });
                drop(_entered);

                if run_connected_loop(&session, stream, &emitter).await {
                    sessions.remove(&session.stream_id);
                    return; // terminal: graceful close completed
                }
            }
            Err(_) => {
                let state = session.transport.on_connect_error();
                let _entered = span.enter();
                tracing::warn!(?state, "connect failed");
                drop(_entered);
                if state == TransportState::Failed {
                    emitter.emit(HostEvent::ConnectionFailed {
                        stream_id: session.stream_id.clone(),
                        reason: "handshake attempts exhausted".to_string(),
                        timestamp: now_millis(),
                    });
                    sessions.remove(&session.stream_id);
                    return;
                }
            }
        }
        tokio::time::sleep(std::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        session.transport.begin_reconnect();
    }
}

/// Runs the connected phase: pacing-driven writable steps interleaved with
/// inbound reads. Returns `true` once the session has terminally closed.
async fn run_connected_loop(
    session: &Arc<Session>,
    stream: crate::transport::WsStream,
    emitter: &Arc<BroadcastEventEmitter>,
) -> bool {
    let (mut sink, mut read) = stream.split();
    let mut accumulator = ReceiveAccumulator::default();
    let mut pacing = tokio::time::interval(std::time::Duration::from_millis(FRAME_DURATION_MS));

    loop {
        tokio::select! {
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        accumulator.push_text(&text);
                        if let Some(full) = accumulator.finish() {
                            handle_inbound_text(session, emitter, &full);
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // Binary inbound frames are never produced by this
                        // protocol; discard per the fragmented-receive rule.
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        let state = session.transport.on_far_end_close();
                        emitter.emit(HostEvent::ConnectionClosed {
                            stream_id: session.stream_id.clone(),
                            reason: "far end closed".to_string(),
                            timestamp: now_millis(),
                        });
                        return state != TransportState::Reconnecting;
                    }
                    _ => {}
                }
            }
            _ = pacing.tick() => {
                let outbound = session.outbound_buffer().unwrap_or_else(|| session.inbound_buffer());
                let outcome = session.transport.writable_step(
                    session.inbound_buffer(),
                    outbound,
                    &session.control,
                    || build_start_message(session).to_json(),
                    || session.stop_message().to_json(),
                );
                let message = match &outcome.action {
                    WritableAction::SendBinaryFrame { track, payload } => {
                        let buffer = if *track == "outbound" { outbound } else { session.inbound_buffer() };
                        Some(Message::Text(
                            session.media_message(track, buffer, payload.clone()).to_json().into(),
                        ))
                    }
                    other => WsClient::to_ws_message(other),
                };
                if let Some(message) = message {
                    if sink.send(message).await.is_err() {
                        let state = session.transport.on_far_end_close();
                        return state != TransportState::Reconnecting;
                    }
                }
                if outcome.terminal {
                    emitter.emit(HostEvent::ConnectionClosed {
                        stream_id: session.stream_id.clone(),
                        reason: "graceful shutdown".to_string(),
                        timestamp: now_millis(),
                    });
                    return true;
                }
            }
        }
    }
}

fn build_start_message(session: &Session) -> StartMessage {
    let tracks = match session.direction() {
        crate::transport::Direction::Inbound => vec!["inbound"],
        crate::transport::Direction::Outbound => vec!["outbound"],
        crate::transport::Direction::Both => vec!["inbound", "outbound"],
    };
    let extra_headers = session.metadata().map(|raw| {
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
    });
    StartMessage {
        sequence_number: session.next_sequence(),
        event: "start",
        start: StartBody {
            call_id: session.stream_id.clone(),
            stream_id: session.stream_id.clone(),
            tracks,
            media_format: MediaFormat {
                encoding: AudioCodec::Pcm16.encoding_str(),
                sample_rate: session.wire_rate(),
            },
        },
        extra_headers,
    }
}

fn handle_inbound_text(session: &Arc<Session>, emitter: &Arc<BroadcastEventEmitter>, text: &str) {
    match parse_inbound(text) {
        Ok(InboundMessage::MediaPlay(play)) => {
            if let Some(playback) = &session.playback {
                playback.handle_media_play(&play);
                emitter.emit(HostEvent::MediaPlayStart {
                    stream_id: session.stream_id.clone(),
                    timestamp: now_millis(),
                });
            }
        }
        Ok(InboundMessage::MediaCheckpoint { name }) => {
            if let Some(playback) = &session.playback {
                playback.handle_checkpoint(name);
            }
        }
        Ok(InboundMessage::MediaClear) => {
            if let Some(playback) = &session.playback {
                playback.handle_clear();
            }
            session.enqueue_control(
                Priority::Critical,
                crate::wire::MediaClearedMessage {
                    sequence_number: session.next_sequence(),
                    stream_id: session.stream_id.clone(),
                    event: "media.cleared",
                }
                .to_json(),
            );
            emitter.emit(HostEvent::MediaCleared {
                stream_id: session.stream_id.clone(),
                timestamp: now_millis(),
            });
        }
        Ok(InboundMessage::TranscriptionSend(payload)) => {
            emitter.emit(HostEvent::TranscriptionReceived {
                stream_id: session.stream_id.clone(),
                payload,
                timestamp: now_millis(),
            });
        }
        Err(err) => {
            if session.notify_invalid_input_once() {
                session.enqueue_control(
                    Priority::High,
                    crate::wire::IncorrectPayloadMessage {
                        event: "incorrectPayload",
                        stream_id: session.stream_id.clone(),
                        payload: serde_json::json!({ "error": err.to_string() }),
                        sequence_number: session.next_sequence(),
                    }
                    .to_json(),
                );
                emitter.emit(HostEvent::StreamInvalidInput {
                    stream_id: session.stream_id.clone(),
                    reason: err.to_string(),
                    timestamp: now_millis(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[tokio::test]
    async fn starting_duplicate_stream_id_is_rejected() {
        let supervisor = Supervisor::new(Config::default()).unwrap();
        let start = Command::parse("start s1 c1 inbound 8000 0 0 ws://127.0.0.1:1/audio").unwrap();
        assert_eq!(supervisor.dispatch(start.clone()), "+OK Success");
        assert_eq!(supervisor.dispatch(start), "-ERR Operation Failed");
        assert_eq!(supervisor.session_count(), 1);
    }

    #[tokio::test]
    async fn pausing_unknown_session_fails() {
        let supervisor = Supervisor::new(Config::default()).unwrap();
        let cmd = Command::parse("pause nope").unwrap();
        assert_eq!(supervisor.dispatch(cmd), "-ERR Operation Failed");
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip_on_existing_session() {
        let supervisor = Supervisor::new(Config::default()).unwrap();
        let start = Command::parse("start s1 c1 inbound 8000 0 0 ws://127.0.0.1:1/audio").unwrap();
        supervisor.dispatch(start);
        let pause = Command::parse("pause s1").unwrap();
        assert_eq!(supervisor.dispatch(pause), "+OK Success");
        let resume = Command::parse("resume s1").unwrap();
        assert_eq!(supervisor.dispatch(resume), "+OK Success");
    }

    #[tokio::test]
    async fn shutdown_drains_without_panicking() {
        let supervisor = Supervisor::new(Config::default()).unwrap();
        let start = Command::parse("start s1 c1 inbound 8000 0 0 ws://127.0.0.1:1/audio").unwrap();
        supervisor.dispatch(start);
        supervisor.shutdown().await;
    }
}
