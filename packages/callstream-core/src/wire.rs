//! Serializer/deserializer for the six outbound and four inbound wire
//! message types.
//!
//! The stream-id field is deliberately inconsistent in casing across
//! message kinds (`stream_id` on `start`/`media`/`stop`; `streamId` on
//! `media.cleared`/`playedStream`) — this mirrors a historical quirk on
//! the peer side and is preserved verbatim rather than "fixed", per the
//! open question in the design notes.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProtocolError;

/// Encodes bytes as standard-alphabet base64 with padding.
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decodes standard-alphabet base64 with padding.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, ProtocolError> {
    BASE64_STANDARD
        .decode(text)
        .map_err(|_| ProtocolError::InvalidBase64)
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaFormat {
    pub encoding: &'static str,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartBody {
    #[serde(rename = "callId")]
    pub call_id: String,
    pub stream_id: String,
    pub tracks: Vec<&'static str>,
    #[serde(rename = "mediaFormat")]
    pub media_format: MediaFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
    pub event: &'static str,
    pub start: StartBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<Value>,
}

impl StartMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("StartMessage serializes")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaBody {
    pub track: &'static str,
    /// Microseconds since stream start, encoded as a decimal string.
    pub timestamp: String,
    pub chunk: u64,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaMessage {
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
    pub stream_id: String,
    pub event: &'static str,
    pub media: MediaBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<Value>,
}

impl MediaMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("MediaMessage serializes")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StopBody {
    #[serde(rename = "callId")]
    pub call_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopMessage {
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
    pub stream_id: String,
    pub event: &'static str,
    pub stop: StopBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<Value>,
}

impl StopMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("StopMessage serializes")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayedStreamMessage {
    pub event: &'static str,
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
    pub stream_id: String,
    pub name: String,
}

impl PlayedStreamMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("PlayedStreamMessage serializes")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IncorrectPayloadMessage {
    pub event: &'static str,
    pub stream_id: String,
    pub payload: Value,
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
}

impl IncorrectPayloadMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("IncorrectPayloadMessage serializes")
    }
}

/// Ack for `media.clear`. Note the camelCase `streamId` here, unlike every
/// other outbound message.
#[derive(Debug, Clone, Serialize)]
pub struct MediaClearedMessage {
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
    #[serde(rename = "streamId")]
    pub stream_id: String,
    pub event: &'static str,
}

impl MediaClearedMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("MediaClearedMessage serializes")
    }
}

/// A normalized `media.play` content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayContentType {
    Pcm16,
    Ulaw,
}

/// A parsed `media.play` payload, ready for [`crate::session::playback::PlaybackInjector`].
#[derive(Debug, Clone)]
pub struct MediaPlay {
    pub payload: Vec<u8>,
    pub content_type: PlayContentType,
    pub sample_rate: u32,
}

/// One of the four accepted inbound message kinds.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    MediaPlay(MediaPlay),
    MediaCheckpoint { name: String },
    MediaClear,
    TranscriptionSend(Value),
}

/// Parses one inbound text frame. Any unparseable JSON, missing `event`
/// field, or unrecognised `event` value is reported as the matching
/// [`ProtocolError`] variant so the caller can ack `incorrectPayload` and
/// keep the session alive.
pub fn parse_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
    let event = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingEvent)?;

    match event {
        "media.play" => parse_media_play(&value).map(InboundMessage::MediaPlay),
        "media.checkpoint" => {
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::MalformedMediaPlay("missing name".into()))?;
            Ok(InboundMessage::MediaCheckpoint {
                name: name.to_string(),
            })
        }
        "media.clear" => Ok(InboundMessage::MediaClear),
        "transcription.send" => Ok(InboundMessage::TranscriptionSend(value)),
        other => Err(ProtocolError::UnknownEvent(other.to_string())),
    }
}

fn parse_media_play(value: &Value) -> Result<MediaPlay, ProtocolError> {
    let media = value
        .get("media")
        .ok_or_else(|| ProtocolError::MalformedMediaPlay("missing media".into()))?;
    let payload_b64 = media
        .get("payload")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedMediaPlay("missing payload".into()))?;
    let content_type_str = media
        .get("contentType")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedMediaPlay("missing contentType".into()))?;
    let raw_rate = media
        .get("sampleRate")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::MalformedMediaPlay("missing sampleRate".into()))?
        as u32;

    let content_type = match content_type_str {
        "audio/x-l16" | "raw" | "wav" => PlayContentType::Pcm16,
        "audio/x-mulaw" => PlayContentType::Ulaw,
        other => {
            return Err(ProtocolError::MalformedMediaPlay(format!(
                "unknown contentType: {other}"
            )))
        }
    };

    let sample_rate = match raw_rate {
        8000 | 16000 => raw_rate,
        _ => {
            log::warn!("media.play sampleRate {raw_rate} is not 8000/16000, coercing to 8000");
            8000
        }
    };

    if content_type == PlayContentType::Ulaw && sample_rate != 8000 {
        return Err(ProtocolError::MalformedMediaPlay(
            "audio/x-mulaw requires sampleRate 8000".into(),
        ));
    }

    let payload = decode_base64(payload_b64)?;
    Ok(MediaPlay {
        payload,
        content_type,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_message_serializes_with_stream_id_snake_case() {
        let msg = StartMessage {
            sequence_number: 0,
            event: "start",
            start: StartBody {
                call_id: "call-1".into(),
                stream_id: "s1".into(),
                tracks: vec!["inbound"],
                media_format: MediaFormat {
                    encoding: "audio/x-l16",
                    sample_rate: 16000,
                },
            },
            extra_headers: None,
        };
        let json = msg.to_json();
        assert!(json.contains("\"stream_id\":\"s1\""));
        assert!(json.contains("\"callId\":\"call-1\""));
        assert!(!json.contains("extra_headers"));
    }

    #[test]
    fn media_cleared_uses_camel_case_stream_id() {
        let msg = MediaClearedMessage {
            sequence_number: 5,
            stream_id: "s1".into(),
            event: "media.cleared",
        };
        let json = msg.to_json();
        assert!(json.contains("\"streamId\":\"s1\""));
        assert!(!json.contains("\"stream_id\""));
    }

    #[test]
    fn parse_inbound_rejects_missing_event() {
        let err = parse_inbound("{}").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingEvent));
    }

    #[test]
    fn parse_inbound_rejects_unknown_event() {
        let err = parse_inbound(r#"{"event":"bogus"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(_)));
    }

    #[test]
    fn parse_inbound_rejects_malformed_json() {
        let err = parse_inbound("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedJson(_)));
    }

    #[test]
    fn media_play_parses_valid_payload() {
        let payload = encode_base64(b"hello");
        let text = format!(
            r#"{{"event":"media.play","media":{{"payload":"{payload}","contentType":"audio/x-l16","sampleRate":8000}}}}"#
        );
        let msg = parse_inbound(&text).unwrap();
        match msg {
            InboundMessage::MediaPlay(p) => {
                assert_eq!(p.payload, b"hello");
                assert_eq!(p.sample_rate, 8000);
                assert_eq!(p.content_type, PlayContentType::Pcm16);
            }
            _ => panic!("expected MediaPlay"),
        }
    }

    #[test]
    fn media_play_coerces_unsupported_sample_rate() {
        let payload = encode_base64(b"hi");
        let text = format!(
            r#"{{"event":"media.play","media":{{"payload":"{payload}","contentType":"audio/x-l16","sampleRate":44100}}}}"#
        );
        let msg = parse_inbound(&text).unwrap();
        match msg {
            InboundMessage::MediaPlay(p) => assert_eq!(p.sample_rate, 8000),
            _ => panic!("expected MediaPlay"),
        }
    }

    #[test]
    fn media_play_mulaw_with_wrong_rate_is_rejected() {
        let payload = encode_base64(b"hi");
        let text = format!(
            r#"{{"event":"media.play","media":{{"payload":"{payload}","contentType":"audio/x-mulaw","sampleRate":16000}}}}"#
        );
        let err = parse_inbound(&text).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedMediaPlay(_)));
    }

    #[test]
    fn media_checkpoint_parses_name() {
        let msg = parse_inbound(r#"{"event":"media.checkpoint","name":"A"}"#).unwrap();
        match msg {
            InboundMessage::MediaCheckpoint { name } => assert_eq!(name, "A"),
            _ => panic!("expected MediaCheckpoint"),
        }
    }

    #[test]
    fn base64_round_trips() {
        let bytes = b"some audio bytes";
        let encoded = encode_base64(bytes);
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, bytes);
    }
}
