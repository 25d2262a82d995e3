//! The imperative command surface: one verb per invocation.
//!
//! The literal external tokenizer (reading a line off a control channel
//! and splitting it into words) is a collaborator out of scope here; what
//! belongs to the engine is validating and dispatching an already-split
//! verb/argument list. [`Command::parse`] is provided as a convenience for
//! the headless binary and for tests, not as a reimplementation of that
//! external tokenizer.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::transport::{Direction, WsTarget};

/// A parsed, validated command ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start {
        stream_id: String,
        call_id: String,
        direction: Direction,
        sample_rate: u32,
        timeout_secs: u64,
        bidirectional: bool,
        metadata: Option<String>,
        target: ParsedUrl,
    },
    Stop {
        stream_id: String,
    },
    Pause {
        stream_id: String,
    },
    Resume {
        stream_id: String,
    },
    GracefulShutdown {
        stream_id: String,
        reason: String,
    },
    SendText {
        stream_id: String,
        text: String,
    },
}

/// A minimally parsed `scheme://host[:port][/path]` target. TLS is implied
/// by `wss`/`https`; `ws`/`http` default to plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub use_tls: bool,
}

impl ParsedUrl {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidUrl(raw.to_string()))?;
        let use_tls = match scheme {
            "wss" | "https" => true,
            "ws" | "http" => false,
            other => return Err(ConfigError::InvalidUrlScheme(other.to_string())),
        };
        let default_port = if use_tls { 443 } else { 80 };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(ConfigError::InvalidUrl(raw.to_string()));
        }
        let (host, port) = match authority.split_once(':') {
            Some((host, port_str)) => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), default_port),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host,
            port,
            path: path.to_string(),
            use_tls,
        })
    }

    #[must_use]
    pub fn to_ws_url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

fn parse_direction(raw: &str) -> Result<Direction, ConfigError> {
    match raw {
        "inbound" => Ok(Direction::Inbound),
        "outbound" => Ok(Direction::Outbound),
        "both" => Ok(Direction::Both),
        other => Err(ConfigError::InvalidDirection(other.to_string())),
    }
}

fn parse_sample_rate(raw: &str) -> Result<u32, ConfigError> {
    let rate: u32 = raw
        .parse()
        .map_err(|_| ConfigError::InvalidSampleRate(raw.to_string()))?;
    if rate == 0 || rate % 8000 != 0 {
        return Err(ConfigError::InvalidSampleRate(raw.to_string()));
    }
    Ok(rate)
}

fn parse_bidi(raw: &str) -> Result<bool, ConfigError> {
    match raw {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ConfigError::InvalidBidiFlag(other.to_string())),
    }
}

fn parse_timeout(raw: &str) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidArgument(format!("invalid timeout: {raw}")))
}

impl Command {
    /// Parses an already-tokenized verb and argument list. The argument
    /// order for `start` is: `stream_id call_id direction sample_rate bidi
    /// url`.
    pub fn from_args(verb: &str, args: &[&str]) -> Result<Self, ConfigError> {
        match verb {
            "start" => {
                let [stream_id, call_id, direction, sample_rate, timeout, bidi, url, metadata @ ..] =
                    args
                else {
                    return Err(ConfigError::MissingArgument(
                        "start requires at least 7 arguments",
                    ));
                };
                let parsed_url = ParsedUrl::parse(url)?;
                Ok(Command::Start {
                    stream_id: (*stream_id).to_string(),
                    call_id: (*call_id).to_string(),
                    direction: parse_direction(direction)?,
                    sample_rate: parse_sample_rate(sample_rate)?,
                    timeout_secs: parse_timeout(timeout)?,
                    bidirectional: parse_bidi(bidi)?,
                    metadata: (!metadata.is_empty()).then(|| metadata.join(" ")),
                    target: parsed_url,
                })
            }
            "stop" => {
                let [stream_id] = args else {
                    return Err(ConfigError::MissingArgument("stop requires 1 argument"));
                };
                Ok(Command::Stop {
                    stream_id: (*stream_id).to_string(),
                })
            }
            "pause" => {
                let [stream_id] = args else {
                    return Err(ConfigError::MissingArgument("pause requires 1 argument"));
                };
                Ok(Command::Pause {
                    stream_id: (*stream_id).to_string(),
                })
            }
            "resume" => {
                let [stream_id] = args else {
                    return Err(ConfigError::MissingArgument("resume requires 1 argument"));
                };
                Ok(Command::Resume {
                    stream_id: (*stream_id).to_string(),
                })
            }
            "graceful-shutdown" => {
                let [stream_id, reason @ ..] = args else {
                    return Err(ConfigError::MissingArgument(
                        "graceful-shutdown requires a stream_id",
                    ));
                };
                Ok(Command::GracefulShutdown {
                    stream_id: (*stream_id).to_string(),
                    reason: reason.join(" "),
                })
            }
            "send_text" => {
                let [stream_id, text @ ..] = args else {
                    return Err(ConfigError::MissingArgument(
                        "send_text requires a stream_id",
                    ));
                };
                Ok(Command::SendText {
                    stream_id: (*stream_id).to_string(),
                    text: text.join(" "),
                })
            }
            other => Err(ConfigError::UnknownVerb(other.to_string())),
        }
    }

    /// Convenience constructor splitting a whitespace-delimited line.
    /// Reserved for the headless binary's stdin loop and tests — not a
    /// reimplementation of the platform's own control-channel tokenizer.
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or(ConfigError::MissingArgument("empty command line"))?;
        let args: Vec<&str> = parts.collect();
        Self::from_args(verb, &args)
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        match self {
            Command::Start { stream_id, .. }
            | Command::Stop { stream_id }
            | Command::Pause { stream_id }
            | Command::Resume { stream_id }
            | Command::GracefulShutdown { stream_id, .. }
            | Command::SendText { stream_id, .. } => stream_id,
        }
    }
}

/// Result text for a dispatched command, matching the external interface's
/// `+OK Success` / `-ERR Operation Failed` convention. Exit code is always
/// 0; the body carries success/failure.
#[must_use]
pub fn format_result(success: bool) -> &'static str {
    if success {
        "+OK Success"
    } else {
        "-ERR Operation Failed"
    }
}

/// Builds the [`WsTarget`] a [`crate::transport::WsClient`] needs to
/// connect, from a parsed `start` command and the process-wide auth/TLS
/// config.
#[must_use]
pub fn target_from_command(
    url: &ParsedUrl,
    subprotocol: String,
    http_auth: crate::state::HttpAuthConfig,
    tls: crate::state::TlsConfig,
) -> WsTarget {
    WsTarget {
        url: url.to_ws_url(),
        use_tls: url.use_tls,
        subprotocol,
        http_auth,
        tls,
    }
}

/// Checks a new stream-id against the set of already-attached sessions.
pub fn check_not_duplicate<F: Fn(&str) -> bool>(
    stream_id: &str,
    is_attached: F,
) -> Result<(), ConfigError> {
    if is_attached(stream_id) {
        return Err(ConfigError::DuplicateStreamId(stream_id.to_string()));
    }
    Ok(())
}

/// Marker used by callers that need an `Arc<str>`-style cheap clone of a
/// stream-id without pulling in a new dependency.
pub type StreamId = Arc<str>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_start_command() {
        let cmd =
            Command::parse("start s1 c1 both 16000 30 1 wss://example.com:9443/audio").unwrap();
        match cmd {
            Command::Start {
                stream_id,
                direction,
                sample_rate,
                timeout_secs,
                bidirectional,
                metadata,
                target,
                ..
            } => {
                assert_eq!(stream_id, "s1");
                assert_eq!(direction, Direction::Both);
                assert_eq!(sample_rate, 16000);
                assert_eq!(timeout_secs, 30);
                assert!(bidirectional);
                assert_eq!(metadata, None);
                assert_eq!(target.host, "example.com");
                assert_eq!(target.port, 9443);
                assert!(target.use_tls);
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn start_command_captures_trailing_metadata() {
        let cmd =
            Command::parse(r#"start s1 c1 inbound 8000 0 0 ws://h/p {"campaign":"x"}"#).unwrap();
        match cmd {
            Command::Start { metadata, .. } => {
                assert_eq!(metadata.as_deref(), Some(r#"{"campaign":"x"}"#));
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn start_url_defaults_port_by_scheme() {
        let url = ParsedUrl::parse("ws://example.com/audio").unwrap();
        assert_eq!(url.port, 80);
        assert!(!url.use_tls);
    }

    #[test]
    fn rejects_invalid_direction() {
        let err = Command::parse("start s1 c1 sideways 8000 30 0 ws://h/p").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDirection(_)));
    }

    #[test]
    fn rejects_sample_rate_not_multiple_of_8000() {
        let err = Command::parse("start s1 c1 inbound 8001 30 0 ws://h/p").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSampleRate(_)));
    }

    #[test]
    fn rejects_invalid_timeout() {
        let err = Command::parse("start s1 c1 inbound 8000 soon 0 ws://h/p").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = Command::parse("start s1 c1 inbound 8000 30 0 ftp://h/p").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrlScheme(_)));
    }

    #[test]
    fn rejects_unknown_verb() {
        let err = Command::parse("dance s1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownVerb(_)));
    }

    #[test]
    fn stop_requires_stream_id() {
        let err = Command::parse("stop").unwrap_err();
        assert!(matches!(err, ConfigError::MissingArgument(_)));
    }

    #[test]
    fn send_text_joins_remaining_words() {
        let cmd = Command::parse("send_text s1 hello there world").unwrap();
        match cmd {
            Command::SendText { text, .. } => assert_eq!(text, "hello there world"),
            _ => panic!("expected SendText"),
        }
    }

    #[test]
    fn format_result_matches_external_interface_convention() {
        assert_eq!(format_result(true), "+OK Success");
        assert_eq!(format_result(false), "-ERR Operation Failed");
    }

    #[test]
    fn duplicate_stream_id_is_rejected() {
        let err = check_not_duplicate("s1", |_| true).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStreamId(_)));
    }
}
