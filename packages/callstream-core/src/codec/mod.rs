//! PCM16 ↔ μ-law transcoding and sample-rate conversion.

pub mod g711;
pub mod resample;

pub use g711::{decode_ulaw_to_pcm16, encode_pcm16_to_ulaw, linear_to_ulaw, ulaw_to_linear};
pub use resample::{BandLimitedResampler, LinearResampler, Resampler};

use crate::protocol_constants::{BASE_FRAME_BYTES_PCM16, BASE_FRAME_BYTES_ULAW, BASE_SAMPLE_RATE_HZ};

/// The audio codec negotiated for a session's wire frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// Linear 16-bit PCM, little-endian.
    Pcm16,
    /// G.711 μ-law.
    Ulaw,
}

impl AudioCodec {
    /// The `mediaFormat.encoding` string used on the wire.
    #[must_use]
    pub fn encoding_str(self) -> &'static str {
        match self {
            Self::Pcm16 => "audio/x-l16",
            Self::Ulaw => "audio/x-mulaw",
        }
    }

    /// The 20ms wire frame size in bytes at the given wire rate.
    ///
    /// `base_frame_size * (wire_rate / 8000)`.
    #[must_use]
    pub fn wire_frame_bytes(self, wire_rate: u32) -> usize {
        let multiple = (wire_rate / BASE_SAMPLE_RATE_HZ).max(1) as usize;
        let base = match self {
            Self::Pcm16 => BASE_FRAME_BYTES_PCM16,
            Self::Ulaw => BASE_FRAME_BYTES_ULAW,
        };
        base * multiple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_frame_bytes_matches_base_table() {
        assert_eq!(AudioCodec::Pcm16.wire_frame_bytes(8000), 320);
        assert_eq!(AudioCodec::Pcm16.wire_frame_bytes(16000), 640);
        assert_eq!(AudioCodec::Ulaw.wire_frame_bytes(8000), 160);
        assert_eq!(AudioCodec::Ulaw.wire_frame_bytes(16000), 320);
    }

    #[test]
    fn encoding_strings_match_wire_spec() {
        assert_eq!(AudioCodec::Pcm16.encoding_str(), "audio/x-l16");
        assert_eq!(AudioCodec::Ulaw.encoding_str(), "audio/x-mulaw");
    }
}
