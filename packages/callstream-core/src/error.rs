//! Centralized error types for the call-stream engine.
//!
//! Every fallible public entry point returns [`EngineResult`]. Internal
//! capture and inbound-parse paths never let an `Err` escape as a panic —
//! they are translated into a host-side event (see [`crate::events`]) and
//! the session keeps running.

use thiserror::Error;

/// Trait for error types that provide a stable, machine-readable code.
///
/// Codes are used for event payloads and log correlation, not HTTP status
/// mapping — this engine has no HTTP surface.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Errors raised while validating or dispatching a command surface verb.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `track` was not one of `inbound`, `outbound`, `both`.
    #[error("invalid direction: {0}")]
    InvalidDirection(String),

    /// `rate` was not a positive multiple of 8000.
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(String),

    /// The URL scheme was not one of `ws`, `wss`, `http`, `https`.
    #[error("invalid url scheme: {0}")]
    InvalidUrlScheme(String),

    /// The URL could not be parsed into host/port/path at all.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A session with this stream-id is already attached to the call.
    #[error("stream-id already attached: {0}")]
    DuplicateStreamId(String),

    /// `bidi` flag was missing or not `0`/`1`.
    #[error("invalid bidi flag: {0}")]
    InvalidBidiFlag(String),

    /// Command verb was not recognised.
    #[error("unknown command verb: {0}")]
    UnknownVerb(String),

    /// Command was missing a required argument.
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// An argument was present but failed to parse into its expected type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidDirection(_) => "invalid_direction",
            Self::InvalidSampleRate(_) => "invalid_sample_rate",
            Self::InvalidUrlScheme(_) => "invalid_url_scheme",
            Self::InvalidUrl(_) => "invalid_url",
            Self::DuplicateStreamId(_) => "duplicate_stream_id",
            Self::InvalidBidiFlag(_) => "invalid_bidi_flag",
            Self::UnknownVerb(_) => "unknown_verb",
            Self::MissingArgument(_) => "missing_argument",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Transport-layer failures, distinguishing transient (retryable) from
/// permanent (terminal) conditions per the error taxonomy.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect or TLS handshake failed; retried up to `MAX_ATTEMPTS`.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The far end closed the socket while the session was `Connected`.
    #[error("far end closed the connection")]
    FarEndClosed,

    /// Reconnection attempts were exhausted.
    #[error("reconnect attempts exhausted")]
    AttemptsExhausted,

    /// The graceful-shutdown deadline (60s) elapsed with audio still buffered.
    #[error("graceful shutdown deadline exceeded")]
    GracefulDeadlineExceeded,

    /// A ring buffer write failed after backpressure had already been signalled.
    #[error("buffer saturated: {0}")]
    BufferSaturated(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::FarEndClosed => "far_end_closed",
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::GracefulDeadlineExceeded => "graceful_deadline_exceeded",
            Self::BufferSaturated(_) => "buffer_saturated",
        }
    }
}

/// Inbound wire-protocol violations. The session survives all of these;
/// the caller is expected to ack with `incorrectPayload` and move on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The inbound text frame was not valid JSON.
    #[error("malformed json: {0}")]
    MalformedJson(String),

    /// The JSON object had no `event` field.
    #[error("missing event field")]
    MissingEvent,

    /// The `event` field did not match one of the four accepted inbound kinds.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// A `media.play` object was missing one of `media`/`payload`/`contentType`/`sampleRate`.
    #[error("malformed media.play: {0}")]
    MalformedMediaPlay(String),

    /// The base64 payload on `media.play` failed to decode.
    #[error("invalid base64 payload")]
    InvalidBase64,
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::MalformedJson(_) => "malformed_json",
            Self::MissingEvent => "missing_event",
            Self::UnknownEvent(_) => "unknown_event",
            Self::MalformedMediaPlay(_) => "malformed_media_play",
            Self::InvalidBase64 => "invalid_base64",
        }
    }
}

/// Top-level error type unifying the taxonomy kinds from the error-handling
/// design: configuration, transport, and protocol errors all fold into this
/// enum so a single `Result` alias can be used at module boundaries.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A configuration or command-validation error (§7 "Configuration").
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A transport-layer error (§7 "Transient transport" / "Permanent transport").
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound protocol error (§7 "Protocol").
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The process-wide worker pool failed to start. The only fatal error
    /// at process scope.
    #[error("failed to start transport worker pool: {0}")]
    WorkerPoolInit(String),
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Transport(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::WorkerPoolInit(_) => "worker_pool_init_failed",
        }
    }
}

/// Convenience alias for engine-wide fallible operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_codes_are_stable() {
        let err = ConfigError::DuplicateStreamId("abc".into());
        assert_eq!(err.code(), "duplicate_stream_id");
    }

    #[test]
    fn engine_error_forwards_nested_code() {
        let err: EngineError = TransportError::AttemptsExhausted.into();
        assert_eq!(err.code(), "attempts_exhausted");
    }

    #[test]
    fn protocol_error_codes_are_stable() {
        let err = ProtocolError::UnknownEvent("frobnicate".into());
        assert_eq!(err.code(), "unknown_event");
    }
}
