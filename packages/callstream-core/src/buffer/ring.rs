//! Fixed-capacity chunked byte ring for audio frames.
//!
//! One [`RingFrameBuffer`] is created per transmitted direction of a
//! session (two when `direction = both`). Writes happen exclusively on the
//! capture path, reads exclusively on the transport path; both sides share
//! the same short-critical-section mutex rather than using separate
//! producer/consumer locks, since the access pattern here is dominated by
//! cheap byte copies, not contention.

use parking_lot::Mutex;

use crate::protocol_constants::{DEGRADATION_STEP, FRAME_STEP_MICROS};

/// Errors returned by ring buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// Remaining capacity was smaller than one chunk.
    #[error("buffer full")]
    BufferFull,

    /// Fewer than one chunk of bytes was available to read.
    #[error("buffer empty")]
    BufferEmpty,

    /// The caller passed a slice whose length did not match the chunk size.
    #[error("frame length {0} does not match chunk size {1}")]
    WrongFrameLength(usize, usize),
}

/// Fires when a write pushes the buffer's fill level past the next 30%
/// milestone (30%, 60%, 90%, ...). Surfaces the earliest evidence that the
/// consumer cannot keep up, without flooding the host event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradationSignal {
    /// Bytes currently held in the buffer at the moment the signal fired.
    pub in_use: usize,
    /// Buffer capacity in bytes.
    pub capacity: usize,
    /// Which milestone (1 = 30%, 2 = 60%, 3 = 90%, ...) just crossed.
    pub milestone: u32,
}

struct RingInner {
    data: Vec<u8>,
    head: usize,
    tail: usize,
    in_use: usize,
    generated_time_micros: u64,
    last_send_time_micros: u64,
    generated_chunks: u64,
    transmitted_chunks: u64,
    degradation_notif_counter: u32,
}

/// A fixed-capacity ring of `chunk_size`-byte frames for one direction of
/// one session.
pub struct RingFrameBuffer {
    stream_id: String,
    chunk_size: usize,
    capacity: usize,
    inner: Mutex<RingInner>,
}

impl RingFrameBuffer {
    /// Creates a buffer sized to hold `buffer_secs` seconds of audio at
    /// `chunk_size` bytes per 20 ms frame.
    #[must_use]
    pub fn new(stream_id: impl Into<String>, chunk_size: usize, buffer_secs: u64) -> Self {
        let frames = buffer_secs * crate::protocol_constants::FRAMES_PER_SECOND;
        let capacity = chunk_size * frames as usize;
        Self {
            stream_id: stream_id.into(),
            chunk_size,
            capacity,
            inner: Mutex::new(RingInner {
                data: vec![0u8; capacity.max(chunk_size)],
                head: 0,
                tail: 0,
                in_use: 0,
                generated_time_micros: 0,
                last_send_time_micros: 0,
                generated_chunks: 0,
                transmitted_chunks: 0,
                degradation_notif_counter: 0,
            }),
        }
    }

    /// The stream-id this buffer belongs to.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Chunk size in bytes (the wire-encoded 20 ms frame size).
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Maximum capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.lock().in_use
    }

    /// `true` if fewer than one chunk is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_use() < self.chunk_size
    }

    /// Copies exactly one chunk into the ring. Fails atomically (no partial
    /// write) with [`RingError::BufferFull`] if remaining capacity is less
    /// than one chunk.
    pub fn write(&self, frame: &[u8]) -> Result<Option<DegradationSignal>, RingError> {
        if frame.len() != self.chunk_size {
            return Err(RingError::WrongFrameLength(frame.len(), self.chunk_size));
        }
        let mut inner = self.inner.lock();
        if self.capacity - inner.in_use < self.chunk_size {
            return Err(RingError::BufferFull);
        }
        let cap = inner.data.len();
        let tail = inner.tail;
        let first = (cap - tail).min(frame.len());
        inner.data[tail..tail + first].copy_from_slice(&frame[..first]);
        if first < frame.len() {
            inner.data[..frame.len() - first].copy_from_slice(&frame[first..]);
        }
        inner.tail = (tail + frame.len()) % cap;
        inner.in_use += frame.len();
        inner.generated_time_micros += FRAME_STEP_MICROS;
        inner.generated_chunks += 1;

        let threshold = self.capacity as f64 * (f64::from(inner.degradation_notif_counter + 1) * DEGRADATION_STEP);
        let signal = if (inner.in_use as f64) > threshold {
            inner.degradation_notif_counter += 1;
            Some(DegradationSignal {
                in_use: inner.in_use,
                capacity: self.capacity,
                milestone: inner.degradation_notif_counter,
            })
        } else {
            None
        };
        Ok(signal)
    }

    /// Reads exactly one chunk out of the ring into `out`, which must be
    /// `chunk_size` bytes long. Fails with [`RingError::BufferEmpty`] if
    /// fewer than one chunk is buffered.
    pub fn read(&self, out: &mut [u8]) -> Result<(), RingError> {
        if out.len() != self.chunk_size {
            return Err(RingError::WrongFrameLength(out.len(), self.chunk_size));
        }
        let mut inner = self.inner.lock();
        if inner.in_use < self.chunk_size {
            return Err(RingError::BufferEmpty);
        }
        let cap = inner.data.len();
        let head = inner.head;
        let first = (cap - head).min(out.len());
        out[..first].copy_from_slice(&inner.data[head..head + first]);
        let out_len = out.len();
        if first < out_len {
            out[first..].copy_from_slice(&inner.data[..out_len - first]);
        }
        inner.head = (head + out.len()) % cap;
        inner.in_use -= out.len();
        inner.last_send_time_micros += FRAME_STEP_MICROS;
        inner.transmitted_chunks += 1;
        Ok(())
    }

    /// Non-blocking read: takes the lock only if it is uncontended. Returns
    /// `None` if the lock was contended (the transport worker skips this
    /// writable event rather than block), `Some(Err(BufferEmpty))` if the
    /// lock was free but fewer than one chunk was buffered, else
    /// `Some(Ok(()))` with `out` filled.
    pub fn try_read(&self, out: &mut [u8]) -> Option<Result<(), RingError>> {
        if out.len() != self.chunk_size {
            return Some(Err(RingError::WrongFrameLength(out.len(), self.chunk_size)));
        }
        let mut inner = self.inner.try_lock()?;
        if inner.in_use < self.chunk_size {
            return Some(Err(RingError::BufferEmpty));
        }
        let cap = inner.data.len();
        let head = inner.head;
        let first = (cap - head).min(out.len());
        out[..first].copy_from_slice(&inner.data[head..head + first]);
        let out_len = out.len();
        if first < out_len {
            out[first..].copy_from_slice(&inner.data[..out_len - first]);
        }
        inner.head = (head + out.len()) % cap;
        inner.in_use -= out.len();
        inner.last_send_time_micros += FRAME_STEP_MICROS;
        inner.transmitted_chunks += 1;
        Some(Ok(()))
    }

    /// Attempts to read one chunk without blocking, returning `Ok(false)`
    /// instead of an error both when the buffer currently holds less than
    /// one chunk and when the lock is contended (used by the transport's
    /// writable loop, which treats either case as "no work this tick"
    /// rather than a failure, and must never block on the capture path's
    /// lock).
    pub fn try_read_chunk(&self, out: &mut [u8]) -> Result<bool, RingError> {
        match self.try_read(out) {
            Some(Ok(())) => Ok(true),
            Some(Err(RingError::BufferEmpty)) | None => Ok(false),
            Some(Err(e)) => Err(e),
        }
    }

    /// The media-clock timestamp (microseconds since stream start) to stamp
    /// on the next outbound `media` message for this buffer, i.e. the time
    /// of the chunk about to be read.
    #[must_use]
    pub fn last_send_time_micros(&self) -> u64 {
        self.inner.lock().last_send_time_micros
    }

    /// Count of chunks transmitted (read) so far; used for the `chunk`
    /// field on outbound `media` messages.
    #[must_use]
    pub fn transmitted_chunks(&self) -> u64 {
        self.inner.lock().transmitted_chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(chunk: usize, secs: u64) -> RingFrameBuffer {
        RingFrameBuffer::new("s1", chunk, secs)
    }

    #[test]
    fn write_then_read_round_trips() {
        let rb = buf(4, 1);
        rb.write(&[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        rb.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn read_on_empty_buffer_is_buffer_empty() {
        let rb = buf(4, 1);
        let mut out = [0u8; 4];
        assert_eq!(rb.read(&mut out), Err(RingError::BufferEmpty));
    }

    #[test]
    fn write_past_capacity_is_buffer_full() {
        let rb = RingFrameBuffer::new("s1", 320, 1);
        let frame = [0u8; 320];
        let frames_per_sec = crate::protocol_constants::FRAMES_PER_SECOND as usize;
        for _ in 0..frames_per_sec {
            rb.write(&frame).unwrap();
        }
        assert_eq!(rb.write(&frame), Err(RingError::BufferFull));
    }

    #[test]
    fn transmitted_never_exceeds_generated() {
        let rb = buf(4, 1);
        for _ in 0..3 {
            rb.write(&[9, 9, 9, 9]).unwrap();
        }
        let mut out = [0u8; 4];
        for _ in 0..3 {
            rb.read(&mut out).unwrap();
        }
        assert_eq!(rb.transmitted_chunks(), 3);
        assert!(rb.read(&mut out).is_err());
    }

    #[test]
    fn degradation_fires_at_thirty_percent_milestones() {
        let rb = RingFrameBuffer::new("s1", 320, 1);
        let frame = [0u8; 320];
        let total_frames = crate::protocol_constants::FRAMES_PER_SECOND as usize;
        let mut milestones = vec![];
        for _ in 0..total_frames {
            if let Ok(Some(sig)) = rb.write(&frame) {
                milestones.push(sig.milestone);
            }
        }
        assert_eq!(milestones, vec![1, 2, 3]);
    }

    #[test]
    fn write_rejects_wrong_length() {
        let rb = buf(4, 1);
        assert_eq!(
            rb.write(&[1, 2, 3]),
            Err(RingError::WrongFrameLength(3, 4))
        );
    }

    #[test]
    fn last_send_time_advances_by_exactly_one_step_per_read() {
        let rb = buf(4, 1);
        rb.write(&[0, 0, 0, 0]).unwrap();
        rb.write(&[0, 0, 0, 0]).unwrap();
        let mut out = [0u8; 4];
        rb.read(&mut out).unwrap();
        assert_eq!(rb.last_send_time_micros(), FRAME_STEP_MICROS);
        rb.read(&mut out).unwrap();
        assert_eq!(rb.last_send_time_micros(), FRAME_STEP_MICROS * 2);
    }
}
