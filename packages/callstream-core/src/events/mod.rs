//! Host-side event types.
//!
//! The engine never calls back into the telephony platform's event bus
//! directly — it emits one [`HostEvent`] per occurrence through whatever
//! [`EventEmitter`](emitter::EventEmitter) was supplied at session
//! construction time (see the capability-set design note). This keeps the
//! transport and session code decoupled from how the host actually
//! delivers events.

pub mod emitter;

pub use emitter::{BroadcastEventEmitter, EventEmitter, LoggingEventEmitter, NoopEventEmitter};
#[cfg(test)]
pub(crate) use emitter::CountingEventEmitter;

use serde::Serialize;
use serde_json::Value;

/// One occurrence on the host-side event bus. Every variant carries at
/// least `stream_id` (serialized as `streamId`); most also carry a
/// `timestamp` (Unix milliseconds).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    ConnectionEstablished { stream_id: String, timestamp: u64 },
    ConnectionFailed { stream_id: String, reason: String, timestamp: u64 },
    ConnectionTimeout { stream_id: String, timestamp: u64 },
    ConnectionDegraded { stream_id: String, milestone: u32, timestamp: u64 },
    ConnectionClosed { stream_id: String, reason: String, timestamp: u64 },
    StreamStarted { stream_id: String, server_url: String, timestamp: u64 },
    StreamStopped { stream_id: String, reason: String, timestamp: u64 },
    StreamError { stream_id: String, reason: String, timestamp: u64 },
    StreamBufferOverrun { stream_id: String, timestamp: u64 },
    StreamHeartbeat { stream_id: String, timestamp: u64 },
    StreamTimeout { stream_id: String, timestamp: u64 },
    StreamInvalidInput { stream_id: String, reason: String, timestamp: u64 },
    MediaPlayStart { stream_id: String, timestamp: u64 },
    MediaPlayComplete { stream_id: String, name: String, timestamp: u64 },
    MediaCleared { stream_id: String, timestamp: u64 },
    TranscriptionReceived { stream_id: String, payload: Value, timestamp: u64 },
    MessageReceived { stream_id: String, payload: Value, timestamp: u64 },
}

impl HostEvent {
    /// The session this event belongs to. Every variant has one.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        match self {
            Self::ConnectionEstablished { stream_id, .. }
            | Self::ConnectionFailed { stream_id, .. }
            | Self::ConnectionTimeout { stream_id, .. }
            | Self::ConnectionDegraded { stream_id, .. }
            | Self::ConnectionClosed { stream_id, .. }
            | Self::StreamStarted { stream_id, .. }
            | Self::StreamStopped { stream_id, .. }
            | Self::StreamError { stream_id, .. }
            | Self::StreamBufferOverrun { stream_id, .. }
            | Self::StreamHeartbeat { stream_id, .. }
            | Self::StreamTimeout { stream_id, .. }
            | Self::StreamInvalidInput { stream_id, .. }
            | Self::MediaPlayStart { stream_id, .. }
            | Self::MediaPlayComplete { stream_id, .. }
            | Self::MediaCleared { stream_id, .. }
            | Self::TranscriptionReceived { stream_id, .. }
            | Self::MessageReceived { stream_id, .. } => stream_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_stream_id_as_camel_case() {
        let event = HostEvent::ConnectionEstablished {
            stream_id: "s1".into(),
            timestamp: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"streamId\":\"s1\""));
    }

    #[test]
    fn stream_id_accessor_covers_every_variant() {
        let event = HostEvent::MediaPlayComplete {
            stream_id: "xyz".into(),
            name: "A".into(),
            timestamp: 1,
        };
        assert_eq!(event.stream_id(), "xyz");
    }
}
