//! TLS connector construction for the outbound WebSocket client.
//!
//! The engine exposes exactly three dev/self-signed escape hatches
//! (`allow_selfsigned`, `skip_hostname_check`, `allow_expired`) rather than a
//! general-purpose TLS configuration surface. Distinguishing them at the
//! certificate-chain level would mean reimplementing `rustls`'s own webpki
//! verifier; instead, setting any one of the three switches the connection
//! to a single permissive verifier that skips chain/expiry/hostname
//! checks entirely. With none set, `connect` is handed `None` and falls
//! back to `tokio-tungstenite`'s default native-roots verification.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as RustlsError, SignatureScheme};
use tokio_tungstenite::Connector;

use crate::state::TlsConfig;

#[derive(Debug)]
struct PermissiveVerifier;

impl ServerCertVerifier for PermissiveVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds a `tokio-tungstenite` connector reflecting `tls`'s relaxation
/// flags, or `None` to fall back to the default native-roots connector.
#[must_use]
pub fn build_connector(tls: &TlsConfig) -> Option<Connector> {
    if !(tls.allow_selfsigned || tls.skip_hostname_check || tls.allow_expired) {
        return None;
    }
    // Idempotent: ignored if a default provider is already installed
    // elsewhere in the process.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PermissiveVerifier))
        .with_no_client_auth();
    Some(Connector::Rustls(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_relaxation_flags_yields_default_connector() {
        assert!(build_connector(&TlsConfig::default()).is_none());
    }

    #[test]
    fn any_relaxation_flag_yields_a_connector() {
        let tls = TlsConfig {
            allow_selfsigned: true,
            ..TlsConfig::default()
        };
        assert!(build_connector(&tls).is_some());
    }
}
