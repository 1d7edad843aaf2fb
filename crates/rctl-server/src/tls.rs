//! TLS material for the listener: PEM loading and development certificates.

use rctl_core::{RctlError, RctlResult};
use rustls::pki_types::CertificateDer;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load TLS certificate and key from PEM files, returning a rustls ServerConfig.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> RctlResult<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| RctlError::Tls(format!("cannot read cert {}: {e}", cert_path.display())))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| RctlError::Tls(format!("cannot read key {}: {e}", key_path.display())))?;

    server_config_from_pem(&cert_pem, &key_pem)
}

/// Build a ServerConfig from in-memory PEM data.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> RctlResult<rustls::ServerConfig> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RctlError::Tls(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(RctlError::Tls("no certificate found in PEM".into()));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| RctlError::Tls(format!("invalid key PEM: {e}")))?
        .ok_or_else(|| RctlError::Tls("no private key found in PEM".into()))?;

    rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| RctlError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RctlError::Tls(e.to_string()))
}

/// PEM-encoded certificate and key.
#[derive(Debug, Clone)]
pub struct SelfSigned {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a self-signed certificate for localhost.
pub fn self_signed(common_name: &str) -> RctlResult<SelfSigned> {
    let tls_err = |e: rcgen::Error| RctlError::Tls(format!("certificate generation failed: {e}"));

    let mut params = rcgen::CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(tls_err)?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);

    let key_pair = rcgen::KeyPair::generate().map_err(tls_err)?;
    let cert = params.self_signed(&key_pair).map_err(tls_err)?;

    Ok(SelfSigned {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Generate a self-signed certificate for development use into `dir`.
pub fn generate_self_signed_cert(dir: &Path) -> RctlResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;

    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    let generated = self_signed("rctl-server dev cert")?;
    std::fs::write(&cert_path, generated.cert_pem)?;
    std::fs::write(&key_path, generated.key_pem)?;

    Ok((cert_path, key_path))
}

/// `~/.rctl`, falling back to the temp dir when there is no home.
pub fn default_material_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".rctl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_cert_loads() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = generate_self_signed_cert(dir.path()).unwrap();
        assert!(cert.exists());
        assert!(key.exists());
        load_tls_config(&cert, &key).unwrap();
    }

    #[test]
    fn missing_files_are_tls_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_config(&dir.path().join("c.pem"), &dir.path().join("k.pem")).unwrap_err();
        assert!(matches!(err, RctlError::Tls(_)));
    }

    #[test]
    fn key_without_cert_is_rejected() {
        let generated = self_signed("test").unwrap();
        let err = server_config_from_pem(generated.key_pem.as_bytes(), generated.key_pem.as_bytes()).unwrap_err();
        assert!(matches!(err, RctlError::Tls(_)));
    }
}
