//! Bounded audio pipeline primitives: ring buffers and the control-message
//! priority queue.

pub mod priority_queue;
pub mod ring;

pub use priority_queue::{ControlQueue, Priority};
pub use ring::{DegradationSignal, RingError, RingFrameBuffer};
