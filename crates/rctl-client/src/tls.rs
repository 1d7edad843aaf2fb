//! Client-side TLS: trust configuration and server-name resolution.

use rctl_core::{RctlError, RctlResult};
use rustls::pki_types::{CertificateDer, ServerName};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Which server certificates the client accepts.
#[derive(Debug, Clone)]
pub enum Trust {
    /// Trust the certificate(s) in this PEM file, typically the server's own.
    CaFile(PathBuf),
    /// Same, from memory.
    CaPem(Vec<u8>),
    /// Accept any certificate. Development only.
    Insecure,
}

/// Settings for one connection attempt.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub trust: Trust,
    /// SNI / verification name. Defaults to the host part of the address.
    pub server_name: Option<String>,
}

impl TlsSettings {
    pub fn new(trust: Trust) -> Self {
        Self {
            trust,
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Build a rustls ClientConfig for `trust`.
pub fn client_config(trust: &Trust) -> RctlResult<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| RctlError::Tls(e.to_string()))?;

    let config = match trust {
        Trust::Insecure => {
            warn!("TLS certificate verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
                .with_no_client_auth()
        }
        Trust::CaFile(path) => {
            let pem = std::fs::read(path)
                .map_err(|e| RctlError::Tls(format!("cannot read CA {}: {e}", path.display())))?;
            builder
                .with_root_certificates(root_store(&pem)?)
                .with_no_client_auth()
        }
        Trust::CaPem(pem) => builder
            .with_root_certificates(root_store(pem)?)
            .with_no_client_auth(),
    };
    Ok(config)
}

fn root_store(pem: &[u8]) -> RctlResult<rustls::RootCertStore> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RctlError::Tls(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(RctlError::Tls("no certificate found in PEM".into()));
    }

    let mut roots = rustls::RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| RctlError::Tls(format!("unusable certificate: {e}")))?;
    }
    Ok(roots)
}

/// Host part of `host:port`, `[v6]:port` or a bare host.
pub fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

pub(crate) fn server_name(settings: &TlsSettings, addr: &str) -> RctlResult<ServerName<'static>> {
    let name = settings
        .server_name
        .clone()
        .unwrap_or_else(|| host_of(addr).to_string());
    ServerName::try_from(name.clone())
        .map_err(|e| RctlError::Tls(format!("invalid server name {name:?}: {e}")))
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct SkipServerVerification(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
