//! Call-stream core: a real-time audio bridge between one telephony call
//! leg and a remote consumer over a bidirectional secure WebSocket.
//!
//! This crate provides the engine underneath a standalone headless server.
//! It is organized into:
//!
//! - [`buffer`]: the bounded audio pipeline — chunked ring buffers and the
//!   priority control-message queue.
//! - [`codec`]: PCM16/μ-law transcoding and sample-rate conversion.
//! - [`wire`]: the ten JSON message shapes exchanged with the peer.
//! - [`transport`]: the outbound WebSocket transport state machine.
//! - [`session`]: the per-call state machine and playback injector.
//! - [`scheduler`]: cancellable one-shot/periodic timers.
//! - [`supervisor`]: the process-wide composition root.
//! - [`command`]: the imperative command surface.
//! - [`events`]: host-side event types and publishers.
//! - [`state`]: process-wide configuration.
//! - [`error`]: centralized error types.
//!
//! # Abstraction traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks without
//!   being tied to a specific async runtime.
//! - [`EventEmitter`](events::EventEmitter): publishing host-side events.

#![warn(clippy::all)]

pub mod buffer;
pub mod codec;
pub mod command;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use buffer::{ControlQueue, DegradationSignal, Priority, RingError, RingFrameBuffer};
pub use codec::{decode_ulaw_to_pcm16, encode_pcm16_to_ulaw, AudioCodec, BandLimitedResampler, LinearResampler, Resampler};
pub use command::{format_result, Command, ParsedUrl, StreamId};
pub use error::{ConfigError, EngineError, EngineResult, ErrorCode, ProtocolError, TransportError};
pub use events::{BroadcastEventEmitter, EventEmitter, HostEvent, LoggingEventEmitter, NoopEventEmitter};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use scheduler::{Scheduler, TaskHandle};
pub use session::{PlaybackInjector, PlayedCheckpoint, SessionEngine, SessionParams};
pub use state::{Config, HttpAuthConfig, TlsConfig, TransportTiming};
pub use supervisor::Supervisor;
pub use transport::{connect, Direction, TransportState, WsClient, WsStream, WsTarget};
pub use wire::{
    decode_base64, encode_base64, parse_inbound, IncorrectPayloadMessage, InboundMessage,
    MediaBody, MediaClearedMessage, MediaFormat, MediaMessage, MediaPlay, PlayContentType,
    PlayedStreamMessage, StartBody, StartMessage, StopBody, StopMessage,
};
