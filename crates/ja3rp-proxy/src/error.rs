use std::io;

use ja3rp_core::{DenyReason, ParseError};
use thiserror::Error;

/// Problems detected while building a server. Fatal to that server instance.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("both a router and a destination were configured; choose one")]
    ConflictingMode,
    #[error("neither a router nor a destination was configured")]
    MissingMode,
    #[error("invalid destination {0:?}: expected http:// or https:// with a host")]
    InvalidDestination(String),
    #[error("invalid client address {0:?} in policy list")]
    InvalidAddress(String),
    #[error("invalid setting: {0}")]
    Invalid(String),
    #[error("TLS material error: {0}")]
    Tls(String),
    #[error("config file error: {0}")]
    File(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Why an inbound TLS handshake did not produce a connection.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("malformed ClientHello: {0}")]
    Parse(#[from] ParseError),
    #[error("denied JA3 {digest}: {reason}")]
    Denied { reason: DenyReason, digest: String },
    #[error("timed out waiting for ClientHello")]
    Timeout,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS handshake failed: {0}")]
    Tls(io::Error),
}

/// Errors returned from the serve entry points.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("listener error: {0}")]
    Io(#[from] io::Error),
    #[error("server closed")]
    Closed,
}
