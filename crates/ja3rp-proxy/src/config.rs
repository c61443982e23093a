//! TOML configuration for the `ja3rp` binary.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8443"
//! handshake_timeout_secs = 10
//!
//! [tls]
//! cert_path = "/etc/ja3rp/cert.pem"
//! key_path = "/etc/ja3rp/key.pem"
//!
//! [policy]
//! ja3_blacklist = ["e7d705a3286e19ea42f587b344ee6865"]
//! ip_whitelist = ["10.0.0.5"]
//!
//! [proxy]
//! destination = "http://127.0.0.1:8080"
//! ```

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::Uri;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::forward::validate_destination;
use crate::server::ServerOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub server: ServerSection,
    pub tls: TlsSection,
    pub policy: PolicySection,
    pub proxy: ForwardSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// `host:port` to bind.
    pub listen: String,
    /// Limit on reading the ClientHello and, separately, on completing the
    /// handshake after admission.
    pub handshake_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8443".to_string(),
            handshake_timeout_secs: 10,
        }
    }
}

/// Certificate chain and key, both PEM. Omit both for plain HTTP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub ja3_whitelist: Vec<String>,
    pub ja3_blacklist: Vec<String>,
    pub ip_whitelist: Vec<String>,
    pub ip_blacklist: Vec<String>,
}

/// Reverse-proxy settings. Without a destination the binary serves its
/// built-in routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardSection {
    pub destination: Option<String>,
}

impl ProxyConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("server.listen is empty".to_string()));
        }
        if self.server.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.handshake_timeout_secs must be at least 1".to_string(),
            ));
        }
        match (&self.tls.cert_path, &self.tls.key_path) {
            (Some(_), None) => {
                return Err(ConfigError::Tls("tls.cert_path set without tls.key_path".to_string()))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Tls("tls.key_path set without tls.cert_path".to_string()))
            }
            _ => {}
        }
        parse_addresses(&self.policy.ip_whitelist)?;
        parse_addresses(&self.policy.ip_blacklist)?;
        self.destination()?;
        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.cert_path.is_some() && self.tls.key_path.is_some()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.server.handshake_timeout_secs)
    }

    pub fn destination(&self) -> Result<Option<Uri>, ConfigError> {
        let Some(raw) = self.proxy.destination.as_deref() else {
            return Ok(None);
        };
        let uri: Uri = raw
            .parse()
            .map_err(|_| ConfigError::InvalidDestination(raw.to_string()))?;
        validate_destination(&uri)?;
        Ok(Some(uri))
    }

    /// Server options for everything but the router, which the caller
    /// supplies when no destination is configured.
    pub fn server_options(&self) -> Result<ServerOptions, ConfigError> {
        Ok(ServerOptions {
            router: None,
            destination: self.destination()?,
            ja3_whitelist: self.policy.ja3_whitelist.clone(),
            ja3_blacklist: self.policy.ja3_blacklist.clone(),
            ip_whitelist: parse_addresses(&self.policy.ip_whitelist)?,
            ip_blacklist: parse_addresses(&self.policy.ip_blacklist)?,
            handshake_timeout: self.handshake_timeout(),
        })
    }
}

/// Parse textual IP addresses, rejecting the whole list on the first bad one.
pub fn parse_addresses(list: &[String]) -> Result<Vec<IpAddr>, ConfigError> {
    list.iter()
        .map(|s| {
            s.trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidAddress(s.clone()))
        })
        .collect()
}
