//! Outbound WebSocket transport.

pub mod tls;
pub mod ws_client;

pub use tls::build_connector;
pub use ws_client::{
    connect, Direction, ReceiveAccumulator, TransportState, WritableAction, WritableOutcome,
    WsClient, WsStream, WsTarget,
};
