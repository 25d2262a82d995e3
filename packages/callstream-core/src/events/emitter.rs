//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! broadcast channel, which keeps the transport and session code testable
//! without a running event bus.

use tokio::sync::broadcast;

use super::HostEvent;

/// Trait for emitting host-side events without knowledge of how they are
/// ultimately delivered (broadcast channel, log sink, test double).
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: HostEvent);
}

/// Discards every event. Used where a caller needs an [`EventEmitter`] but
/// has no subscriber to deliver to.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _event: HostEvent) {}
}

/// Logs every event at debug level. Useful when running headless without a
/// host-side subscriber attached.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit(&self, event: HostEvent) {
        log::debug!("stream_id={} event={:?}", event.stream_id(), event);
    }
}

/// Forwards events onto a `tokio::sync::broadcast` channel that the host
/// subscribes to.
///
/// This is the production emitter: the session engine and transport hold a
/// clone and call [`EventEmitter::emit`]; whatever is driving the session
/// subscribes via [`BroadcastEventEmitter::subscribe`].
#[derive(Clone)]
pub struct BroadcastEventEmitter {
    tx: broadcast::Sender<HostEvent>,
}

impl BroadcastEventEmitter {
    /// Creates a new bridge with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    #[must_use]
    pub fn with_sender(tx: broadcast::Sender<HostEvent>) -> Self {
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    #[must_use]
    pub fn sender(&self) -> &broadcast::Sender<HostEvent> {
        &self.tx
    }
}

impl EventEmitter for BroadcastEventEmitter {
    fn emit(&self, event: HostEvent) {
        if let Err(e) = self.tx.send(event) {
            log::trace!("no event subscribers: {e}");
        }
    }
}

/// Test emitter that counts events instead of delivering them anywhere.
/// Used by other modules' tests that need an `EventEmitter` with an
/// observable side effect.
#[cfg(test)]
pub(crate) struct CountingEventEmitter {
    count: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl CountingEventEmitter {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub(crate) fn count(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Default for CountingEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl EventEmitter for CountingEventEmitter {
    fn emit(&self, _event: HostEvent) {
        self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = CountingEventEmitter::new();
        emitter.emit(HostEvent::ConnectionEstablished {
            stream_id: "s1".into(),
            timestamp: 0,
        });
        emitter.emit(HostEvent::StreamStopped {
            stream_id: "s1".into(),
            reason: "done".into(),
            timestamp: 1,
        });
        assert_eq!(emitter.count(), 2);
    }

    #[tokio::test]
    async fn broadcast_emitter_delivers_to_subscriber() {
        let bridge = BroadcastEventEmitter::new(8);
        let mut rx = bridge.subscribe();
        bridge.emit(HostEvent::StreamHeartbeat {
            stream_id: "s1".into(),
            timestamp: 42,
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.stream_id(), "s1");
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let bridge = BroadcastEventEmitter::new(8);
        bridge.emit(HostEvent::StreamHeartbeat {
            stream_id: "s1".into(),
            timestamp: 0,
        });
    }
}
