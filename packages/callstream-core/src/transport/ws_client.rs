//! Outbound WebSocket transport state machine.
//!
//! Connection lifecycle (`start`/handshake outcome/far-end close) is
//! modeled as an explicit state machine; the per-writable-event send
//! policy is modeled separately as a pure decision function
//! ([`WsClient::writable_step`]) so it can be driven by a real socket loop
//! or exercised directly in tests without one.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config, MaybeTlsStream, WebSocketStream,
};

use crate::buffer::{ControlQueue, RingFrameBuffer};
use crate::error::TransportError;
use crate::protocol_constants::{GRACEFUL_SHUTDOWN_BUDGET_SECS, MAX_ATTEMPTS, MAX_RECV_BUF_BYTES};
use crate::state::{HttpAuthConfig, TlsConfig};
use crate::transport::tls::build_connector;

/// Which ring buffer(s) a session's writable loop should drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
    Both,
}

/// Transport connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Reconnecting,
    Failed,
}

/// Everything needed to open the socket and perform the handshake.
#[derive(Debug, Clone)]
pub struct WsTarget {
    pub url: String,
    pub use_tls: bool,
    pub subprotocol: String,
    pub http_auth: HttpAuthConfig,
    pub tls: TlsConfig,
}

/// The underlying socket type, split between plain TCP and TLS streams.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Performs the initial handshake. `wss`/TLS target uses rustls via
/// `connect_async_tls_with_config`; plain `ws` uses `connect_async`. When
/// `target.tls` has a relaxation flag set, a permissive connector is built
/// in place of the default native-roots verifier.
#[tracing::instrument(skip(target), fields(url = %target.url, use_tls = target.use_tls))]
pub async fn connect(target: &WsTarget) -> Result<WsStream, TransportError> {
    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(&target.subprotocol)
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?,
    );
    if let Some(header) = target.http_auth.basic_auth_header() {
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&header).map_err(|e| TransportError::ConnectFailed(e.to_string()))?,
        );
    }

    let (stream, _response) = if target.use_tls {
        let connector = build_connector(&target.tls);
        connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "tls handshake failed");
                TransportError::ConnectFailed(e.to_string())
            })?
    } else {
        connect_async(request).await.map_err(|e| {
            tracing::warn!(error = %e, "tcp handshake failed");
            TransportError::ConnectFailed(e.to_string())
        })?
    };
    tracing::info!("handshake complete");
    Ok(stream)
}

/// Accumulates fragmented text frames until the final fragment arrives.
/// Any fragment marked binary is discarded per the fragmented-receive rule.
#[derive(Default)]
pub struct ReceiveAccumulator {
    buf: String,
    truncated: bool,
}

impl ReceiveAccumulator {
    /// Appends a text fragment. Truncates (and marks for drop) if the
    /// accumulator would exceed [`MAX_RECV_BUF_BYTES`].
    pub fn push_text(&mut self, fragment: &str) {
        if self.truncated {
            return;
        }
        if self.buf.len() + fragment.len() > MAX_RECV_BUF_BYTES {
            log::warn!("inbound message exceeded {MAX_RECV_BUF_BYTES} bytes, dropping");
            self.truncated = true;
            self.buf.clear();
            return;
        }
        self.buf.push_str(fragment);
    }

    /// Called on the final fragment. Returns the accumulated message, or
    /// `None` if it was truncated (and therefore dropped).
    pub fn finish(&mut self) -> Option<String> {
        let truncated = std::mem::replace(&mut self.truncated, false);
        let buf = std::mem::take(&mut self.buf);
        if truncated {
            None
        } else {
            Some(buf)
        }
    }
}

/// What a writable-loop iteration decided to do.
#[derive(Debug)]
pub enum WritableAction {
    Close,
    SendText(String),
    SendBinaryFrame { track: &'static str, payload: Vec<u8> },
    None,
}

/// Result of one [`WsClient::writable_step`] call.
#[derive(Debug)]
pub struct WritableOutcome {
    pub action: WritableAction,
    pub request_again: bool,
    pub terminal: bool,
}

impl WritableOutcome {
    fn none() -> Self {
        Self {
            action: WritableAction::None,
            request_again: false,
            terminal: false,
        }
    }
}

/// The outbound WebSocket transport for one session.
pub struct WsClient {
    direction: Direction,
    state: Mutex<TransportState>,
    attempts: AtomicU32,
    connect_emitted: AtomicBool,
    start_sent: AtomicBool,
    stop_sent: AtomicBool,
    graceful_shutdown: AtomicBool,
    graceful_deadline: Mutex<Option<Instant>>,
    switch_to_outbound: AtomicBool,
}

impl WsClient {
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: Mutex::new(TransportState::Idle),
            attempts: AtomicU32::new(0),
            connect_emitted: AtomicBool::new(false),
            start_sent: AtomicBool::new(false),
            stop_sent: AtomicBool::new(false),
            graceful_shutdown: AtomicBool::new(false),
            graceful_deadline: Mutex::new(None),
            switch_to_outbound: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// `Idle -> Connecting`. Returns `false` if not currently idle.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != TransportState::Idle {
            return false;
        }
        *state = TransportState::Connecting;
        true
    }

    /// Handshake succeeded. Returns `true` the first time this session
    /// transitions to `Connected` (the caller should emit `CONNECT_SUCCESS`
    /// only on that first transition, not on reconnects).
    pub fn on_connect_success(&self) -> bool {
        *self.state.lock() = TransportState::Connected;
        !self.connect_emitted.swap(true, Ordering::SeqCst)
    }

    /// Handshake failed, or the far end closed while connected. Schedules a
    /// reconnect if attempts remain, else marks the session `Failed`
    /// (handshake error) or leaves it `Disconnected` (far-end close, no
    /// attempts left).
    pub fn on_connect_error(&self) -> TransportState {
        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        *state = if attempts <= MAX_ATTEMPTS {
            TransportState::Reconnecting
        } else {
            TransportState::Failed
        };
        *state
    }

    /// Far-end closed the socket while `Connected`.
    pub fn on_far_end_close(&self) -> TransportState {
        let attempts = self.attempts.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        *state = if attempts < MAX_ATTEMPTS {
            TransportState::Reconnecting
        } else {
            TransportState::Disconnected
        };
        *state
    }

    /// Reconnect attempt about to start: `Reconnecting -> Connecting`.
    pub fn begin_reconnect(&self) {
        *self.state.lock() = TransportState::Connecting;
    }

    pub fn close(&self) {
        *self.state.lock() = TransportState::Disconnecting;
    }

    /// Requests a graceful shutdown: the writable loop drains buffers and
    /// sends `stop` before closing, up to [`GRACEFUL_SHUTDOWN_BUDGET_SECS`].
    pub fn graceful_shutdown(&self) {
        self.graceful_shutdown.store(true, Ordering::SeqCst);
        *self.graceful_deadline.lock() = Some(Instant::now() + Duration::from_secs(GRACEFUL_SHUTDOWN_BUDGET_SECS));
    }

    #[must_use]
    pub fn is_graceful_shutdown(&self) -> bool {
        self.graceful_shutdown.load(Ordering::SeqCst)
    }

    fn graceful_deadline_passed(&self) -> bool {
        self.graceful_deadline
            .lock()
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// One iteration of the writable-loop policy (spec §4.5, steps 1-6).
    #[allow(clippy::too_many_arguments)]
    pub fn writable_step(
        &self,
        inbound: &RingFrameBuffer,
        outbound: &RingFrameBuffer,
        control: &ControlQueue,
        start_msg: impl FnOnce() -> String,
        stop_msg: impl FnOnce() -> String,
    ) -> WritableOutcome {
        // Step 1: graceful-shutdown deadline exceeded -> force close.
        if self.graceful_shutdown.load(Ordering::SeqCst) && self.graceful_deadline_passed() {
            *self.state.lock() = TransportState::Disconnecting;
            return WritableOutcome {
                action: WritableAction::Close,
                request_again: false,
                terminal: true,
            };
        }

        // Step 2: graceful-shutdown, buffers drained, stop not yet sent.
        if self.graceful_shutdown.load(Ordering::SeqCst)
            && inbound.is_empty()
            && outbound.is_empty()
            && !self.stop_sent.load(Ordering::SeqCst)
        {
            self.stop_sent.store(true, Ordering::SeqCst);
            *self.state.lock() = TransportState::Disconnecting;
            return WritableOutcome {
                action: WritableAction::SendText(stop_msg()),
                request_again: true,
                terminal: false,
            };
        }

        // Step 3: start not yet sent.
        if !self.start_sent.swap(true, Ordering::SeqCst) {
            return WritableOutcome {
                action: WritableAction::SendText(start_msg()),
                request_again: true,
                terminal: false,
            };
        }

        // Step 4: control queue has a pending message.
        if let Some(message) = control.dequeue() {
            return WritableOutcome {
                action: WritableAction::SendText(message),
                request_again: true,
                terminal: false,
            };
        }

        // Step 5: disconnecting -> close, terminal.
        if *self.state.lock() == TransportState::Disconnecting {
            return WritableOutcome {
                action: WritableAction::Close,
                request_again: false,
                terminal: true,
            };
        }

        // Step 6: pick a buffer per direction policy and attempt one send.
        let buffer = match self.direction {
            Direction::Inbound => inbound,
            Direction::Outbound => outbound,
            Direction::Both => {
                let use_outbound = self.switch_to_outbound.fetch_xor(true, Ordering::SeqCst);
                if use_outbound {
                    outbound
                } else {
                    inbound
                }
            }
        };
        let track: &'static str = if std::ptr::eq(buffer, inbound) {
            "inbound"
        } else {
            "outbound"
        };

        let mut chunk = vec![0u8; buffer.chunk_size()];
        match buffer.try_read_chunk(&mut chunk) {
            Ok(true) => WritableOutcome {
                action: WritableAction::SendBinaryFrame {
                    track,
                    payload: chunk,
                },
                request_again: true,
                terminal: false,
            },
            _ => WritableOutcome::none(),
        }
    }

    /// Converts a decision outcome's text frame into a tungstenite message.
    #[must_use]
    pub fn to_ws_message(action: &WritableAction) -> Option<Message> {
        match action {
            WritableAction::SendText(text) => Some(Message::Text(text.clone().into())),
            WritableAction::SendBinaryFrame { payload, .. } => {
                Some(Message::Binary(payload.clone().into()))
            }
            WritableAction::Close => Some(Message::Close(None)),
            WritableAction::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Priority;

    fn make_buffers() -> (RingFrameBuffer, RingFrameBuffer, ControlQueue) {
        (
            RingFrameBuffer::new("s1", 4, 1),
            RingFrameBuffer::new("s1", 4, 1),
            ControlQueue::new(),
        )
    }

    #[test]
    fn start_transitions_idle_to_connecting() {
        let client = WsClient::new(Direction::Inbound);
        assert!(client.start());
        assert_eq!(client.state(), TransportState::Connecting);
        assert!(!client.start());
    }

    #[test]
    fn connect_success_emits_only_once() {
        let client = WsClient::new(Direction::Inbound);
        client.start();
        assert!(client.on_connect_success());
        assert_eq!(client.state(), TransportState::Connected);
        assert!(!client.on_connect_success());
    }

    #[test]
    fn connect_error_reconnects_until_attempts_exhausted() {
        let client = WsClient::new(Direction::Inbound);
        for _ in 0..MAX_ATTEMPTS {
            assert_eq!(client.on_connect_error(), TransportState::Reconnecting);
        }
        assert_eq!(client.on_connect_error(), TransportState::Failed);
    }

    #[test]
    fn writable_step_sends_start_before_anything_else() {
        let client = WsClient::new(Direction::Inbound);
        let (inbound, outbound, control) = make_buffers();
        control.enqueue(Priority::Normal, "ignored-until-start-sent".into());
        let outcome = client.writable_step(
            &inbound,
            &outbound,
            &control,
            || "start-json".to_string(),
            || "stop-json".to_string(),
        );
        match outcome.action {
            WritableAction::SendText(text) => assert_eq!(text, "start-json"),
            _ => panic!("expected start message"),
        }
        assert!(outcome.request_again);
    }

    #[test]
    fn writable_step_drains_control_queue_before_audio() {
        let client = WsClient::new(Direction::Inbound);
        let (inbound, outbound, control) = make_buffers();
        client.start_sent.store(true, std::sync::atomic::Ordering::SeqCst);
        control.enqueue(Priority::Critical, "played".into());
        let outcome = client.writable_step(
            &inbound,
            &outbound,
            &control,
            || unreachable!(),
            || unreachable!(),
        );
        match outcome.action {
            WritableAction::SendText(text) => assert_eq!(text, "played"),
            _ => panic!("expected control message"),
        }
    }

    #[test]
    fn writable_step_sends_one_audio_chunk_when_available() {
        let client = WsClient::new(Direction::Inbound);
        let (inbound, outbound, control) = make_buffers();
        client.start_sent.store(true, std::sync::atomic::Ordering::SeqCst);
        inbound.write(&[1, 2, 3, 4]).unwrap();
        let outcome = client.writable_step(
            &inbound,
            &outbound,
            &control,
            || unreachable!(),
            || unreachable!(),
        );
        match outcome.action {
            WritableAction::SendBinaryFrame { track, payload } => {
                assert_eq!(track, "inbound");
                assert_eq!(payload, vec![1, 2, 3, 4]);
            }
            other => panic!("expected audio frame, got {other:?}"),
        }
    }

    #[test]
    fn writable_step_both_direction_alternates_buffers() {
        let client = WsClient::new(Direction::Both);
        let (inbound, outbound, control) = make_buffers();
        client.start_sent.store(true, std::sync::atomic::Ordering::SeqCst);
        inbound.write(&[9, 9, 9, 9]).unwrap();
        outbound.write(&[8, 8, 8, 8]).unwrap();

        let first = client.writable_step(&inbound, &outbound, &control, || unreachable!(), || unreachable!());
        let second = client.writable_step(&inbound, &outbound, &control, || unreachable!(), || unreachable!());

        let tracks: Vec<&str> = [&first, &second]
            .iter()
            .filter_map(|o| match &o.action {
                WritableAction::SendBinaryFrame { track, .. } => Some(*track),
                _ => None,
            })
            .collect();
        assert_eq!(tracks, vec!["inbound", "outbound"]);
    }

    #[test]
    fn graceful_shutdown_sends_stop_once_buffers_drained() {
        let client = WsClient::new(Direction::Inbound);
        let (inbound, outbound, control) = make_buffers();
        client.start_sent.store(true, std::sync::atomic::Ordering::SeqCst);
        client.graceful_shutdown();
        let outcome = client.writable_step(
            &inbound,
            &outbound,
            &control,
            || unreachable!(),
            || "stop-json".to_string(),
        );
        match outcome.action {
            WritableAction::SendText(text) => assert_eq!(text, "stop-json"),
            _ => panic!("expected stop message"),
        }
        assert_eq!(client.state(), TransportState::Disconnecting);
    }

    #[test]
    fn receive_accumulator_drops_oversized_message() {
        let mut acc = ReceiveAccumulator::default();
        acc.push_text(&"x".repeat(MAX_RECV_BUF_BYTES + 1));
        assert!(acc.finish().is_none());
    }

    #[test]
    fn receive_accumulator_joins_fragments() {
        let mut acc = ReceiveAccumulator::default();
        acc.push_text("hel");
        acc.push_text("lo");
        assert_eq!(acc.finish().as_deref(), Some("hello"));
    }
}
