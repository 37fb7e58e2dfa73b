//! TLS Policy
//!
//! Builds the rustls connector used for `wss://` feeds. Strict mode verifies
//! the server chain against the bundled webpki roots. The insecure mode
//! accepts any certificate (handshake signatures are still checked) and is
//! meant for development endpoints with self-signed certs only.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_tungstenite::Connector;

/// Errors building a TLS client configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// rustls rejected the configuration.
    #[error("TLS config error: {0}")]
    Config(#[from] rustls::Error),

    /// Unknown policy name.
    #[error("unknown TLS policy '{0}' (expected 'strict' or 'insecure')")]
    UnknownPolicy(String),
}

/// How the server certificate is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Verify the chain and hostname against webpki roots.
    #[default]
    Strict,
    /// Skip certificate verification.
    AcceptInvalidCerts,
}

impl TlsPolicy {
    /// Policy name as used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::AcceptInvalidCerts => "insecure",
        }
    }

    /// Build a tungstenite connector for this policy.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] if rustls rejects the protocol setup.
    pub fn connector(self) -> Result<Connector, TlsError> {
        Ok(Connector::Rustls(Arc::new(self.client_config()?)))
    }

    /// Build the rustls client configuration for this policy.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] if rustls rejects the protocol setup.
    pub fn client_config(self) -> Result<ClientConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let config = match self {
            Self::Strict => {
                let roots =
                    RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            Self::AcceptInvalidCerts => {
                tracing::warn!("TLS certificate verification disabled for feed connection");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
                    .with_no_client_auth()
            }
        };

        Ok(config)
    }
}

impl fmt::Display for TlsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsPolicy {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "verify" | "true" | "on" | "1" => Ok(Self::Strict),
            "insecure" | "none" | "off" | "false" | "0" => Ok(Self::AcceptInvalidCerts),
            other => Err(TlsError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("strict", TlsPolicy::Strict)]
    #[test_case("STRICT", TlsPolicy::Strict)]
    #[test_case(" true ", TlsPolicy::Strict)]
    #[test_case("insecure", TlsPolicy::AcceptInvalidCerts)]
    #[test_case("none", TlsPolicy::AcceptInvalidCerts)]
    #[test_case("off", TlsPolicy::AcceptInvalidCerts)]
    fn parses_policy_names(input: &str, expected: TlsPolicy) {
        assert_eq!(input.parse::<TlsPolicy>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(matches!(
            "sometimes".parse::<TlsPolicy>(),
            Err(TlsError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn default_is_strict() {
        assert_eq!(TlsPolicy::default(), TlsPolicy::Strict);
        assert_eq!(TlsPolicy::default().to_string(), "strict");
    }

    #[test]
    fn both_policies_build_connectors() {
        assert!(matches!(
            TlsPolicy::Strict.connector().unwrap(),
            Connector::Rustls(_)
        ));
        assert!(matches!(
            TlsPolicy::AcceptInvalidCerts.connector().unwrap(),
            Connector::Rustls(_)
        ));
    }
}
