//! Process-wide engine configuration.
//!
//! [`Config`] groups every tunable named in the environment-configuration
//! table: TLS knobs, HTTP Basic credentials, worker/buffer sizing, and the
//! sub-protocol name. It is constructed with validated defaults and can be
//! overridden field-by-field by the hosting binary's own env/CLI layer.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_BUFFER_SECS, DEFAULT_SERVICE_THREADS, DEFAULT_SUBPROTOCOL, EVENT_CHANNEL_CAPACITY,
    HEARTBEAT_INTERVAL_SECS, MAX_ATTEMPTS, MAX_BUFFER_SECS, MAX_SERVICE_THREADS,
    MIN_BUFFER_SECS, MIN_SERVICE_THREADS, RECONNECT_DELAY_SECS,
};

/// TLS validation knobs for the outbound WebSocket client.
///
/// These are deliberately narrow: the engine has no general-purpose TLS
/// configuration surface, only the three dev/self-signed escape hatches
/// named in the external interface table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Accept self-signed certificates. Development use only.
    pub allow_selfsigned: bool,
    /// Skip server certificate hostname verification.
    pub skip_hostname_check: bool,
    /// Accept expired certificates.
    pub allow_expired: bool,
}

/// HTTP Basic credentials added to the WebSocket handshake when both
/// fields are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpAuthConfig {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl HttpAuthConfig {
    /// Builds the `Authorization: Basic ...` header value, if both
    /// credentials are configured.
    #[must_use]
    pub fn basic_auth_header(&self) -> Option<String> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => {
                let raw = format!("{user}:{password}");
                Some(format!("Basic {}", STANDARD.encode(raw)))
            }
            _ => None,
        }
    }
}

/// Validated timing/sizing knobs for the transport state machine.
///
/// Broken out from [`Config`] so tests can construct a fast-reconnecting
/// variant without touching TLS/auth fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportTiming {
    pub max_attempts: u32,
    pub reconnect_delay_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            reconnect_delay_secs: RECONNECT_DELAY_SECS,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
        }
    }
}

/// Process-wide engine configuration. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket sub-protocol offered in the handshake.
    pub subprotocol_name: String,

    /// Number of transport worker threads (clamped 1..=5 by [`Self::validate`]).
    pub service_threads: usize,

    /// Ring buffer depth in seconds (clamped 1..=40 by [`Self::validate`]).
    pub buffer_secs: u64,

    pub tls: TlsConfig,
    pub http_auth: HttpAuthConfig,
    pub transport_timing: TransportTiming,

    /// Capacity of the host-side event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subprotocol_name: DEFAULT_SUBPROTOCOL.to_string(),
            service_threads: DEFAULT_SERVICE_THREADS,
            buffer_secs: DEFAULT_BUFFER_SECS,
            tls: TlsConfig::default(),
            http_auth: HttpAuthConfig::default(),
            transport_timing: TransportTiming::default(),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Clamps `service_threads` and `buffer_secs` into their documented
    /// ranges. Unlike a hard validation failure, out-of-range values are
    /// silently clamped — the environment-configuration table documents
    /// these as "clamped", not "rejected".
    pub fn clamp(&mut self) {
        self.service_threads = self
            .service_threads
            .clamp(MIN_SERVICE_THREADS, MAX_SERVICE_THREADS);
        self.buffer_secs = self.buffer_secs.clamp(MIN_BUFFER_SECS, MAX_BUFFER_SECS);
    }

    /// Validates the configuration, returning a descriptive error instead
    /// of panicking on an unusable value (e.g. a zero event-channel
    /// capacity, which would panic inside `tokio::sync::broadcast::channel`).
    pub fn validate(&self) -> Result<(), String> {
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be >= 1".to_string());
        }
        if self.subprotocol_name.is_empty() {
            return Err("subprotocol_name must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn clamp_bounds_service_threads_and_buffer_secs() {
        let mut config = Config {
            service_threads: 99,
            buffer_secs: 0,
            ..Config::default()
        };
        config.clamp();
        assert_eq!(config.service_threads, MAX_SERVICE_THREADS);
        assert_eq!(config.buffer_secs, MIN_BUFFER_SECS);
    }

    #[test]
    fn basic_auth_header_requires_both_fields() {
        let mut auth = HttpAuthConfig::default();
        assert!(auth.basic_auth_header().is_none());
        auth.user = Some("alice".into());
        assert!(auth.basic_auth_header().is_none());
        auth.password = Some("secret".into());
        assert_eq!(
            auth.basic_auth_header().as_deref(),
            Some("Basic YWxpY2U6c2VjcmV0")
        );
    }

    #[test]
    fn empty_event_channel_capacity_is_rejected() {
        let config = Config {
            event_channel_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
