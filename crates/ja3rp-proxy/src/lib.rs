//! HTTP(S) server and reverse proxy that fingerprints every TLS client with
//! JA3 and admits or rejects it during the handshake.
//!
//! ```no_run
//! use axum::{routing::get, Router};
//! use ja3rp_proxy::{Server, ServerOptions};
//!
//! # async fn run() -> Result<(), ja3rp_proxy::ServerError> {
//! let routes = Router::new().route("/", get(|| async { "hello" }));
//! let opts = ServerOptions {
//!     ja3_blacklist: vec!["e7d705a3286e19ea42f587b344ee6865".into()],
//!     ..ServerOptions::with_router(routes)
//! };
//! let server = Server::new("0.0.0.0:8443", opts)?;
//! server.listen_and_serve_tls("cert.pem", "key.pem").await
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod forward;
pub mod handshake;
pub mod rewind;
pub mod server;
pub mod tls;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::ProxyConfig;
pub use context::{ConnectionContext, Ja3Ext};
pub use error::{ConfigError, HandshakeError, ServerError};
pub use forward::Forwarder;
pub use handshake::{HandshakeState, Ja3Acceptor, DEFAULT_HANDSHAKE_TIMEOUT};
pub use server::{Server, ServerOptions};
