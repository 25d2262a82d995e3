//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the wire protocol and the transport state
//! machine; changing them would break compatibility with the peer service.

// ─────────────────────────────────────────────────────────────────────────────
// Audio framing
// ─────────────────────────────────────────────────────────────────────────────

/// Frame duration for every capture/playback frame (ms).
pub const FRAME_DURATION_MS: u64 = 20;

/// Frame duration in microseconds, used for the logical media clock step.
pub const FRAME_STEP_MICROS: u64 = FRAME_DURATION_MS * 1000;

/// PCM16 wire frame size at 8 kHz for a 20 ms frame (bytes).
///
/// `wire_frame_bytes(rate) = BASE_FRAME_BYTES_PCM16 * (rate / 8000)`.
pub const BASE_FRAME_BYTES_PCM16: usize = 320;

/// μ-law wire frame size at 8 kHz for a 20 ms frame (bytes).
pub const BASE_FRAME_BYTES_ULAW: usize = 160;

/// Ring buffer frames per second at the base 8 kHz rate (50 frames/s at 20ms each).
pub const FRAMES_PER_SECOND: u64 = 1000 / FRAME_DURATION_MS;

// ─────────────────────────────────────────────────────────────────────────────
// Transport state machine
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum reconnection attempts before a session transitions to `Failed`.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before a reconnect attempt (seconds).
pub const RECONNECT_DELAY_SECS: u64 = 1;

/// Heartbeat interval once `Connected` (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Hard budget for a graceful shutdown to complete once requested (seconds).
pub const GRACEFUL_SHUTDOWN_BUDGET_SECS: u64 = 60;

/// Maximum size of the fragmented-receive accumulator before truncation (bytes).
///
/// ~19 MiB, matching the peer service's own inbound frame cap.
pub const MAX_RECV_BUF_BYTES: usize = 19 * 1024 * 1024;

/// Default WebSocket sub-protocol offered during the handshake.
pub const DEFAULT_SUBPROTOCOL: &str = "audio.freeswitch.org";

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor / worker pool
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of transport worker threads.
pub const DEFAULT_SERVICE_THREADS: usize = 2;

/// Minimum allowed transport worker count.
pub const MIN_SERVICE_THREADS: usize = 1;

/// Maximum allowed transport worker count.
pub const MAX_SERVICE_THREADS: usize = 5;

/// Capacity of each worker's bounded pending-work channel.
pub const WORKER_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the host-side event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Ring buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Default ring buffer depth (seconds of audio).
pub const DEFAULT_BUFFER_SECS: u64 = 40;

/// Minimum allowed ring buffer depth (seconds).
pub const MIN_BUFFER_SECS: u64 = 1;

/// Maximum allowed ring buffer depth (seconds).
pub const MAX_BUFFER_SECS: u64 = 40;

/// Degradation fill-level milestone step (30%, 60%, 90%, ...).
pub const DEGRADATION_STEP: f64 = 0.3;

// ─────────────────────────────────────────────────────────────────────────────
// Sample rates
// ─────────────────────────────────────────────────────────────────────────────

/// Base telephony sample rate (Hz). All wire rates are positive multiples of this.
pub const BASE_SAMPLE_RATE_HZ: u32 = 8000;

/// Sample rates accepted verbatim on inbound `media.play` without coercion.
pub const ACCEPTED_PLAY_SAMPLE_RATES: [u32; 2] = [8000, 16000];

/// Sample mixing saturation bound (16-bit signed PCM).
pub const SAMPLE_SATURATION_MAX: i32 = i16::MAX as i32;

/// Sample mixing saturation bound (16-bit signed PCM), negative side.
pub const SAMPLE_SATURATION_MIN: i32 = i16::MIN as i32;
