//! Playback injection: turns inbound `media.play` frames into outgoing
//! audio mixed into the call, and tracks `media.checkpoint` positions so
//! `playedStream` events fire at the right byte offset.
//!
//! Only constructed for bidirectional sessions.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::codec::{decode_ulaw_to_pcm16, BandLimitedResampler, Resampler};
use crate::protocol_constants::{SAMPLE_SATURATION_MAX, SAMPLE_SATURATION_MIN};
use crate::wire::{MediaPlay, PlayContentType};

/// One pending checkpoint: fires once `bytes_played >= position`.
#[derive(Debug, Clone)]
struct Checkpoint {
    name: String,
    position: u64,
}

struct WriteBuffer {
    bytes: VecDeque<u8>,
    bytes_received: u64,
    bytes_played: u64,
    checkpoints: VecDeque<Checkpoint>,
}

impl WriteBuffer {
    fn new() -> Self {
        Self {
            bytes: VecDeque::new(),
            bytes_received: 0,
            bytes_played: 0,
            checkpoints: VecDeque::new(),
        }
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.checkpoints.clear();
        self.bytes_received = 0;
        self.bytes_played = 0;
    }
}

/// A `playedStream` firing, to be turned into a wire control message and a
/// host-side event by the caller.
#[derive(Debug, Clone)]
pub struct PlayedCheckpoint {
    pub name: String,
}

/// Injects `media.play` audio into outgoing call frames by sample-mixing.
pub struct PlaybackInjector {
    call_rate: u32,
    buffer: Mutex<WriteBuffer>,
    resampler: Mutex<Option<BandLimitedResampler>>,
    resampler_rate: Mutex<Option<u32>>,
}

impl PlaybackInjector {
    #[must_use]
    pub fn new(call_rate: u32) -> Self {
        Self {
            call_rate,
            buffer: Mutex::new(WriteBuffer::new()),
            resampler: Mutex::new(None),
            resampler_rate: Mutex::new(None),
        }
    }

    /// Handles a parsed `media.play` message: decode, resample if needed,
    /// and append to the write buffer.
    pub fn handle_media_play(&self, play: &MediaPlay) {
        let mut pcm = match play.content_type {
            PlayContentType::Pcm16 => play.payload.clone(),
            PlayContentType::Ulaw => decode_ulaw_to_pcm16(&play.payload),
        };

        if play.sample_rate != self.call_rate {
            pcm = self.resample(&pcm, play.sample_rate);
        }

        let mut buffer = self.buffer.lock();
        let added = pcm.len() as u64;
        buffer.bytes.extend(pcm);
        buffer.bytes_received += added;
    }

    fn resample(&self, pcm_bytes: &[u8], from_rate: u32) -> Vec<u8> {
        let samples: Vec<i16> = pcm_bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        let mut resampler_rate = self.resampler_rate.lock();
        let mut resampler = self.resampler.lock();
        if resampler.is_none() || *resampler_rate != Some(from_rate) {
            *resampler = Some(BandLimitedResampler::default());
            *resampler_rate = Some(from_rate);
        }

        let mut out = Vec::new();
        resampler
            .as_mut()
            .expect("resampler initialized above")
            .process(&samples, from_rate, self.call_rate, &mut out);

        out.into_iter().flat_map(i16::to_le_bytes).collect()
    }

    /// Handles `media.checkpoint`. Ignored with a warning if nothing has
    /// been received yet.
    pub fn handle_checkpoint(&self, name: String) {
        let mut buffer = self.buffer.lock();
        if buffer.bytes_received == 0 {
            log::warn!("media.checkpoint {name:?} received before any media.play data");
            return;
        }
        let position = buffer.bytes_received;
        buffer.checkpoints.push_back(Checkpoint { name, position });
    }

    /// Handles `media.clear`: drops all buffered audio and checkpoints.
    pub fn handle_clear(&self) {
        self.buffer.lock().clear();
    }

    /// Write-replace path: reads exactly `frame.len()` bytes from the write
    /// buffer and mixes them into `frame` by 16-bit saturating add. Returns
    /// every checkpoint that became due as a result of this read, in order.
    ///
    /// Does nothing (frame left untouched) if fewer than `frame.len()`
    /// bytes are buffered.
    pub fn mix_into(&self, frame: &mut [u8]) -> Vec<PlayedCheckpoint> {
        let mut buffer = self.buffer.lock();
        if buffer.bytes.len() < frame.len() {
            return Vec::new();
        }

        for sample_bytes in frame.chunks_mut(2) {
            if sample_bytes.len() < 2 {
                break;
            }
            let played = [
                buffer.bytes.pop_front().unwrap(),
                buffer.bytes.pop_front().unwrap(),
            ];
            let existing = i16::from_le_bytes([sample_bytes[0], sample_bytes[1]]);
            let incoming = i16::from_le_bytes(played);
            let mixed = (i32::from(existing) + i32::from(incoming))
                .clamp(SAMPLE_SATURATION_MIN, SAMPLE_SATURATION_MAX) as i16;
            let mixed_bytes = mixed.to_le_bytes();
            sample_bytes[0] = mixed_bytes[0];
            sample_bytes[1] = mixed_bytes[1];
        }

        buffer.bytes_played += frame.len() as u64;

        let mut fired = Vec::new();
        while let Some(head) = buffer.checkpoints.front() {
            if buffer.bytes_played >= head.position {
                let checkpoint = buffer.checkpoints.pop_front().expect("front checked above");
                fired.push(PlayedCheckpoint {
                    name: checkpoint.name,
                });
            } else {
                break;
            }
        }
        fired
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.buffer.lock().bytes_received
    }

    #[must_use]
    pub fn bytes_played(&self) -> u64 {
        self.buffer.lock().bytes_played
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_frame(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn media_play_appends_to_write_buffer() {
        let injector = PlaybackInjector::new(8000);
        let play = MediaPlay {
            payload: pcm_frame(&[100, 200]),
            content_type: PlayContentType::Pcm16,
            sample_rate: 8000,
        };
        injector.handle_media_play(&play);
        assert_eq!(injector.bytes_received(), 4);
    }

    #[test]
    fn checkpoint_before_any_media_is_ignored() {
        let injector = PlaybackInjector::new(8000);
        injector.handle_checkpoint("early".into());
        let mut frame = pcm_frame(&[0, 0]);
        let fired = injector.mix_into(&mut frame);
        assert!(fired.is_empty());
    }

    #[test]
    fn mix_into_saturating_adds_and_fires_checkpoint() {
        let injector = PlaybackInjector::new(8000);
        let play = MediaPlay {
            payload: pcm_frame(&[30000, 30000]),
            content_type: PlayContentType::Pcm16,
            sample_rate: 8000,
        };
        injector.handle_media_play(&play);
        injector.handle_checkpoint("cp1".into());

        let mut frame = pcm_frame(&[10000, 10000]);
        let fired = injector.mix_into(&mut frame);

        let mixed = i16::from_le_bytes([frame[0], frame[1]]);
        assert_eq!(mixed, i16::MAX); // 30000 + 10000 saturates at 32767
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].name, "cp1");
    }

    #[test]
    fn mix_into_does_nothing_when_buffer_too_small() {
        let injector = PlaybackInjector::new(8000);
        let mut frame = pcm_frame(&[1, 2, 3, 4]);
        let original = frame.clone();
        let fired = injector.mix_into(&mut frame);
        assert!(fired.is_empty());
        assert_eq!(frame, original);
    }

    #[test]
    fn clear_drops_buffered_audio_and_checkpoints() {
        let injector = PlaybackInjector::new(8000);
        let play = MediaPlay {
            payload: pcm_frame(&[1, 2, 3]),
            content_type: PlayContentType::Pcm16,
            sample_rate: 8000,
        };
        injector.handle_media_play(&play);
        injector.handle_checkpoint("a".into());
        injector.handle_clear();
        assert_eq!(injector.bytes_received(), 0);
        assert_eq!(injector.bytes_played(), 0);
    }

    #[test]
    fn ulaw_payload_is_decoded_before_mixing() {
        let injector = PlaybackInjector::new(8000);
        let play = MediaPlay {
            payload: vec![0xFF, 0x7F], // silence in mu-law
            content_type: PlayContentType::Ulaw,
            sample_rate: 8000,
        };
        injector.handle_media_play(&play);
        // mu-law decode doubles byte count: 2 ulaw bytes -> 4 pcm bytes
        assert_eq!(injector.bytes_received(), 4);
    }
}
