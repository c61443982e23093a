//! Per-connection record handed to request handlers.

use std::net::SocketAddr;

use hyper::http::request::Parts;
use hyper::http::{Extensions, Request};
use ja3rp_core::{Decision, Ja3Fingerprint};

/// What the server learned about a connection while accepting it.
///
/// Created when the handshake starts, complete once it is admitted, and
/// cloned into every request served on that connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub remote_addr: SocketAddr,
    /// Absent for plain-TCP connections.
    pub ja3: Option<Ja3Fingerprint>,
    pub server_name: Option<String>,
    pub decision: Decision,
}

impl ConnectionContext {
    /// Context for a freshly accepted connection. Nothing is known about the
    /// client yet beyond its address.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            ja3: None,
            server_name: None,
            decision: Decision::Admit,
        }
    }

    /// Context for a connection that never went through TLS.
    pub fn plain(remote_addr: SocketAddr) -> Self {
        Self::new(remote_addr)
    }

    /// JA3 digest, or `""` when the connection is not TLS.
    pub fn ja3_digest(&self) -> &str {
        self.ja3.as_ref().map(|fp| fp.digest.as_str()).unwrap_or("")
    }

    pub fn ja3_raw(&self) -> &str {
        self.ja3.as_ref().map(|fp| fp.raw.as_str()).unwrap_or("")
    }
}

/// Read-only access to the connection's JA3 from request-handling code.
pub trait Ja3Ext {
    fn connection(&self) -> Option<&ConnectionContext>;

    /// JA3 digest of the client, empty if the request did not arrive over TLS.
    fn ja3(&self) -> &str {
        self.connection().map(|c| c.ja3_digest()).unwrap_or("")
    }

    /// Unhashed JA3 string, empty if the request did not arrive over TLS.
    fn ja3_raw(&self) -> &str {
        self.connection().map(|c| c.ja3_raw()).unwrap_or("")
    }
}

impl Ja3Ext for Extensions {
    fn connection(&self) -> Option<&ConnectionContext> {
        self.get::<ConnectionContext>()
    }
}

impl<B> Ja3Ext for Request<B> {
    fn connection(&self) -> Option<&ConnectionContext> {
        self.extensions().connection()
    }
}

impl Ja3Ext for Parts {
    fn connection(&self) -> Option<&ConnectionContext> {
        self.extensions.connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_context() -> ConnectionContext {
        ConnectionContext {
            remote_addr: "127.0.0.1:40000".parse().unwrap(),
            ja3: Some(Ja3Fingerprint {
                raw: "771,4865,0,29,0".to_string(),
                digest: "0123456789abcdef0123456789abcdef".to_string(),
            }),
            server_name: Some("localhost".to_string()),
            decision: Decision::Admit,
        }
    }

    #[test]
    fn request_exposes_digest() {
        let mut req = Request::new(());
        req.extensions_mut().insert(tls_context());
        assert_eq!(req.ja3(), "0123456789abcdef0123456789abcdef");
        assert_eq!(req.ja3_raw(), "771,4865,0,29,0");

        let (parts, _) = req.into_parts();
        assert_eq!(parts.ja3().len(), 32);
    }

    #[test]
    fn plain_connection_has_empty_digest() {
        let mut req = Request::new(());
        req.extensions_mut()
            .insert(ConnectionContext::plain("127.0.0.1:1".parse().unwrap()));
        assert_eq!(req.ja3(), "");
        assert!(req.connection().is_some());
    }

    #[test]
    fn missing_context_has_empty_digest() {
        let req = Request::new(());
        assert_eq!(req.ja3(), "");
        assert!(req.connection().is_none());
    }
}
