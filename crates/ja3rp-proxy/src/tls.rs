//! Certificate/key loading and rustls server configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tracing::info;

use crate::error::ConfigError;

/// ALPN protocols offered to clients, most preferred first.
pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Load a certificate chain from a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::Tls(format!("failed to open certificate file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    let chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("failed to parse certificates: {}", e)))?;

    if chain.is_empty() {
        return Err(ConfigError::Tls(format!("no certificates found in {:?}", path)));
    }
    Ok(chain)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|e| {
        ConfigError::Tls(format!("failed to open private key file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| ConfigError::Tls(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| ConfigError::Tls(format!("no private key found in {:?}", path)))
}

/// Build a server config that serves `chain` with `key` and advertises
/// [`ALPN_PROTOCOLS`].
pub fn server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, ConfigError> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(format!("unsupported protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| ConfigError::Tls(format!("certificate/key rejected: {}", e)))?;

    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(config))
}

/// Load PEM files and build the server config in one step.
pub fn server_config_from_pem(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<ServerConfig>, ConfigError> {
    let chain = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;
    info!(
        "Loaded {} certificate(s) from {}",
        chain.len(),
        cert_path.display()
    );
    server_config(chain, key)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use crate::test_support::TestPki;
    use super::*;

    fn pem_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_pem_pair() {
        let pki = TestPki::generate();
        let cert = pem_file(&pki.leaf_pem);
        let key = pem_file(&pki.key_pem);

        let chain = load_certificates(cert.path()).unwrap();
        assert_eq!(chain, vec![pki.leaf_der.clone()]);

        let config = server_config_from_pem(cert.path(), key.path()).unwrap();
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_certificates(Path::new("/nonexistent/ja3rp/cert.pem")).unwrap_err();
        assert!(matches!(err, ConfigError::Tls(_)));
    }

    #[test]
    fn file_without_certificates_is_rejected() {
        let pki = TestPki::generate();
        let key_only = pem_file(&pki.key_pem);
        let err = load_certificates(key_only.path()).unwrap_err();
        assert!(err.to_string().contains("no certificates"));

        let cert_only = pem_file(&pki.leaf_pem);
        let err = load_private_key(cert_only.path()).unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }
}
