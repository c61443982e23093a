use std::fmt;

use serde::Serialize;

/// Fields of a ClientHello that feed the JA3 fingerprint, plus a couple of
/// values kept around for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    /// `legacy_version` from the ClientHello body (e.g., 0x0303 for TLS 1.2)
    pub tls_version: u16,
    /// Cipher suite values in wire order
    pub cipher_suites: Vec<u16>,
    /// Extension type codes in wire order
    pub extensions: Vec<u16>,
    /// Supported groups / named curves (from extension 0x000a)
    pub elliptic_curves: Vec<u16>,
    /// EC point format values (from extension 0x000b)
    pub ec_point_formats: Vec<u8>,
    /// Server Name Indication
    pub server_name: Option<String>,
    /// ALPN protocol values
    pub alpn_protocols: Vec<String>,
}

/// A computed JA3 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Ja3Fingerprint {
    /// `version,ciphers,extensions,curves,point_formats`
    pub raw: String,
    /// 32-character lowercase MD5 hex digest of `raw`
    pub digest: String,
}

impl fmt::Display for Ja3Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}
