//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! matching the environment-configuration table: worker/buffer sizing, the
//! sub-protocol name, TLS escape hatches, and HTTP Basic credentials.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket sub-protocol offered in the handshake.
    /// Override: `CALLSTREAM_SUBPROTOCOL`
    pub subprotocol_name: String,

    /// Number of transport worker threads (clamped 1..=5).
    /// Override: `CALLSTREAM_SERVICE_THREADS`
    pub service_threads: usize,

    /// Ring buffer depth in seconds (clamped 1..=40).
    /// Override: `CALLSTREAM_BUFFER_SECS`
    pub buffer_secs: u64,

    /// Accept self-signed TLS certificates. Development use only.
    pub tls_allow_selfsigned: bool,

    /// Skip server certificate hostname verification.
    pub tls_skip_hostname_check: bool,

    /// Accept expired TLS certificates.
    pub tls_allow_expired: bool,

    /// HTTP Basic auth username added to the handshake.
    /// Override: `CALLSTREAM_HTTP_AUTH_USER`
    pub http_auth_user: Option<String>,

    /// HTTP Basic auth password added to the handshake.
    /// Override: `CALLSTREAM_HTTP_AUTH_PASSWORD`
    pub http_auth_password: Option<String>,

    /// Capacity of the host-side event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = callstream_core::Config::default();
        Self {
            subprotocol_name: defaults.subprotocol_name,
            service_threads: defaults.service_threads,
            buffer_secs: defaults.buffer_secs,
            tls_allow_selfsigned: defaults.tls.allow_selfsigned,
            tls_skip_hostname_check: defaults.tls.skip_hostname_check,
            tls_allow_expired: defaults.tls.allow_expired,
            http_auth_user: defaults.http_auth.user,
            http_auth_password: defaults.http_auth.password,
            event_channel_capacity: defaults.event_channel_capacity,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CALLSTREAM_SUBPROTOCOL") {
            self.subprotocol_name = val;
        }
        if let Ok(val) = std::env::var("CALLSTREAM_SERVICE_THREADS") {
            if let Ok(threads) = val.parse() {
                self.service_threads = threads;
            }
        }
        if let Ok(val) = std::env::var("CALLSTREAM_BUFFER_SECS") {
            if let Ok(secs) = val.parse() {
                self.buffer_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("CALLSTREAM_HTTP_AUTH_USER") {
            self.http_auth_user = Some(val);
        }
        if let Ok(val) = std::env::var("CALLSTREAM_HTTP_AUTH_PASSWORD") {
            self.http_auth_password = Some(val);
        }
    }

    /// Converts to `callstream-core`'s [`callstream_core::Config`] type.
    pub fn to_core_config(&self) -> callstream_core::Config {
        let mut config = callstream_core::Config {
            subprotocol_name: self.subprotocol_name.clone(),
            service_threads: self.service_threads,
            buffer_secs: self.buffer_secs,
            tls: callstream_core::TlsConfig {
                allow_selfsigned: self.tls_allow_selfsigned,
                skip_hostname_check: self.tls_skip_hostname_check,
                allow_expired: self.tls_allow_expired,
            },
            http_auth: callstream_core::HttpAuthConfig {
                user: self.http_auth_user.clone(),
                password: self.http_auth_password.clone(),
            },
            event_channel_capacity: self.event_channel_capacity,
            ..Default::default()
        };
        config.clamp();
        config
    }
}
