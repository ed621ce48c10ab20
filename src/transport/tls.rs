//! TLS transport selection for MQTT connections.
//!
//! - `Disabled`: plain TCP
//! - `Verified`: rustls with system/webpki roots, or a custom CA
//! - `Insecure`: rustls with certificate verification turned off
//!
//! `Insecure` exists for brokers with self-signed certificates and must be
//! requested explicitly (`--mqtt_tls_insecure`). It provides encryption
//! without authentication of the broker.

use anyhow::{anyhow, Context, Result};
use rumqttc::tokio_rustls::rustls;
use rumqttc::{TlsConfiguration, Transport};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
    #[default]
    Disabled,
    Verified,
    Insecure,
}

impl TlsMode {
    /// Map the command-line flags onto a mode.
    pub fn from_flags(use_tls: bool, insecure: bool) -> Result<Self> {
        match (use_tls, insecure) {
            (false, false) => Ok(Self::Disabled),
            (true, false) => Ok(Self::Verified),
            (true, true) => Ok(Self::Insecure),
            (false, true) => Err(anyhow!("--mqtt_tls_insecure requires --mqtt_tls")),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Verified => write!(f, "verified"),
            Self::Insecure => write!(f, "insecure (certificate verification disabled)"),
        }
    }
}

/// TLS settings for one connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub mode: TlsMode,
    /// PEM CA bundle to trust instead of the system roots.
    pub ca_path: Option<PathBuf>,
}

impl TlsSettings {
    pub fn validate(&self) -> Result<()> {
        if self.ca_path.is_some() && !self.mode.is_enabled() {
            return Err(anyhow!(
                "MQTT TLS CA provided but TLS is disabled (use --mqtt_tls)"
            ));
        }
        if self.ca_path.is_some() && self.mode == TlsMode::Insecure {
            return Err(anyhow!(
                "MQTT TLS CA has no effect when certificate verification is disabled"
            ));
        }
        Ok(())
    }

    /// Build the rumqttc transport for these settings.
    pub fn build_transport(&self) -> Result<Transport> {
        self.validate()?;
        match self.mode {
            TlsMode::Disabled => Ok(Transport::tcp()),
            TlsMode::Verified => match &self.ca_path {
                Some(path) => Ok(Transport::tls(read_ca(path)?, None, None)),
                None => Ok(Transport::tls_with_default_config()),
            },
            TlsMode::Insecure => {
                log::warn!(
                    "MQTT TLS certificate verification is DISABLED; the broker is not authenticated"
                );
                let config = ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                    .with_no_client_auth();
                Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
                    Arc::new(config),
                )))
            }
        }
    }
}

fn read_ca(path: &Path) -> Result<Vec<u8>> {
    let ca = std::fs::read(path)
        .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?;
    if ca.is_empty() {
        return Err(anyhow!("MQTT TLS CA '{}' is empty", path.display()));
    }
    Ok(ca)
}

/// Accepts every server certificate. Used only in `TlsMode::Insecure`.
#[derive(Debug)]
struct AcceptAnyServerCert;

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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
