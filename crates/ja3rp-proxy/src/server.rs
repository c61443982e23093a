//! Listener, accept loop and per-connection dispatch.

use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use ja3rp_core::AccessPolicy;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::context::ConnectionContext;
use crate::error::{ConfigError, HandshakeError, ServerError};
use crate::forward::Forwarder;
use crate::handshake::{Ja3Acceptor, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::tls;

/// Pause after a failed `accept` so a descriptor shortage does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a [`Server`] is built from. Exactly one of `router` and
/// `destination` must be set.
#[derive(Clone)]
pub struct ServerOptions {
    /// Router mode: requests go to these routes.
    pub router: Option<Router>,
    /// Reverse-proxy mode: every request is forwarded to this origin.
    pub destination: Option<Uri>,
    pub ja3_whitelist: Vec<String>,
    pub ja3_blacklist: Vec<String>,
    pub ip_whitelist: Vec<IpAddr>,
    pub ip_blacklist: Vec<IpAddr>,
    pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            router: None,
            destination: None,
            ja3_whitelist: Vec::new(),
            ja3_blacklist: Vec::new(),
            ip_whitelist: Vec::new(),
            ip_blacklist: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ServerOptions {
    pub fn with_router(router: Router) -> Self {
        Self {
            router: Some(router),
            ..Self::default()
        }
    }

    pub fn with_destination(destination: Uri) -> Self {
        Self {
            destination: Some(destination),
            ..Self::default()
        }
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::builder()
            .ja3_whitelist(self.ja3_whitelist.iter().cloned())
            .ja3_blacklist(self.ja3_blacklist.iter().cloned())
            .ip_whitelist(self.ip_whitelist.iter().copied())
            .ip_blacklist(self.ip_blacklist.iter().copied())
            .build()
    }
}

#[derive(Clone)]
enum Mode {
    Router(Router),
    Forward(Forwarder),
}

impl Mode {
    async fn handle(self, req: Request<Incoming>, client_ip: IpAddr) -> Response<Body> {
        match self {
            Mode::Router(router) => match router.oneshot(req).await {
                Ok(resp) => resp,
                Err(never) => match never {},
            },
            Mode::Forward(forwarder) => forwarder.forward(req, client_ip).await,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Router(_) => f.write_str("router"),
            Mode::Forward(fwd) => write!(f, "reverse proxy to {}", fwd.destination()),
        }
    }
}

/// A JA3-aware HTTP server in router or reverse-proxy mode.
///
/// Methods take `&self`; share the server through an `Arc` to serve from one
/// task and [`close`](Server::close) from another.
pub struct Server {
    addr: String,
    mode: Mode,
    policy: Arc<ArcSwap<AccessPolicy>>,
    handshake_timeout: Duration,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(addr: impl Into<String>, mut options: ServerOptions) -> Result<Self, ConfigError> {
        let mode = match (options.router.take(), options.destination.take()) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingMode),
            (None, None) => return Err(ConfigError::MissingMode),
            (Some(router), None) => Mode::Router(router),
            (None, Some(destination)) => Mode::Forward(Forwarder::new(destination)?),
        };
        let policy = options.access_policy();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            addr: addr.into(),
            mode,
            policy: Arc::new(ArcSwap::from_pointee(policy)),
            handshake_timeout: options.handshake_timeout,
            shutdown,
        })
    }

    /// Snapshot of the policy new handshakes are evaluated against.
    pub fn policy(&self) -> Arc<AccessPolicy> {
        self.policy.load_full()
    }

    /// Swap in a new policy. Handshakes already past their policy check keep
    /// the decision they got.
    pub fn replace_policy(&self, policy: AccessPolicy) {
        self.policy.store(Arc::new(policy));
        info!("access policy replaced");
    }

    /// Bind `addr` and serve plain HTTP.
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        self.ensure_open()?;
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Load the PEM certificate chain and key, bind `addr`, serve HTTPS.
    pub async fn listen_and_serve_tls(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        self.ensure_open()?;
        let config = tls::server_config_from_pem(cert_path.as_ref(), key_path.as_ref())?;
        let listener = TcpListener::bind(&self.addr).await?;
        self.serve_tls(listener, config).await
    }

    /// Serve plain HTTP on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.accept_loop(listener, None).await
    }

    /// Serve HTTPS on an already-bound listener, fingerprinting every
    /// handshake.
    pub async fn serve_tls(
        &self,
        listener: TcpListener,
        config: Arc<rustls::ServerConfig>,
    ) -> Result<(), ServerError> {
        let acceptor =
            Ja3Acceptor::new(config, self.policy.clone()).with_timeout(self.handshake_timeout);
        self.accept_loop(listener, Some(acceptor)).await
    }

    /// Stop accepting and release the listening socket. Connections already
    /// accepted run to completion on their own.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn ensure_open(&self) -> Result<(), ServerError> {
        if self.is_closed() {
            Err(ServerError::Closed)
        } else {
            Ok(())
        }
    }

    async fn accept_loop(
        &self,
        listener: TcpListener,
        acceptor: Option<Ja3Acceptor>,
    ) -> Result<(), ServerError> {
        self.ensure_open()?;
        let local_addr = listener.local_addr()?;
        let mut shutdown = self.shutdown.subscribe();
        info!(
            "ja3rp listening on {} ({}, {})",
            local_addr,
            if acceptor.is_some() { "tls" } else { "plain" },
            self.mode
        );

        loop {
            let (stream, peer) = tokio::select! {
                // The watch guard must not outlive this branch or the loop
                // stops being Send.
                _ = async { let _ = shutdown.wait_for(|closed| *closed).await; } => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept on {} failed: {}", local_addr, e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let mode = self.mode.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                match acceptor {
                    None => serve_connection(stream, ConnectionContext::plain(peer), mode).await,
                    Some(acceptor) => match acceptor.accept(stream, peer).await {
                        Ok((tls_stream, ctx)) => serve_connection(tls_stream, ctx, mode).await,
                        // Logged by the acceptor.
                        Err(HandshakeError::Denied { .. }) => {}
                        Err(e) => debug!(peer = %peer, "TLS handshake aborted: {}", e),
                    },
                }
            });
        }

        drop(listener);
        info!("ja3rp listener on {} closed", local_addr);
        Ok(())
    }
}

/// Serve HTTP/1.1 or HTTP/2 on one established connection, attaching `ctx`
/// to every request.
async fn serve_connection<S>(io: S, ctx: ConnectionContext, mode: Mode)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer: SocketAddr = ctx.remote_addr;
    let service = service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(ctx.clone());
        req.extensions_mut().insert(ConnectInfo(peer));
        let mode = mode.clone();
        async move { Ok::<_, Infallible>(mode.handle(req, peer.ip()).await) }
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(io), service)
        .await
    {
        debug!(peer = %peer, "connection closed with error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    fn router() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[test]
    fn exactly_one_mode_is_required() {
        let err = Server::new("127.0.0.1:0", ServerOptions::default()).err().unwrap();
        assert!(matches!(err, ConfigError::MissingMode));

        let both = ServerOptions {
            router: Some(router()),
            destination: Some("http://127.0.0.1:9".parse().unwrap()),
            ..ServerOptions::default()
        };
        let err = Server::new("127.0.0.1:0", both).err().unwrap();
        assert!(matches!(err, ConfigError::ConflictingMode));
    }

    #[test]
    fn bad_destination_is_rejected() {
        let opts = ServerOptions::with_destination("/relative".parse().unwrap());
        let err = Server::new("127.0.0.1:0", opts).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidDestination(_)));
    }

    #[test]
    fn options_build_policy() {
        let opts = ServerOptions {
            ja3_blacklist: vec!["a".into()],
            ip_blacklist: vec!["127.0.0.1".parse().unwrap()],
            ..ServerOptions::with_router(router())
        };
        let server = Server::new("127.0.0.1:0", opts).unwrap();
        assert!(!server.policy().is_unrestricted());

        server.replace_policy(AccessPolicy::allow_all());
        assert!(server.policy().is_unrestricted());
    }

    fn assert_send<T: Send>(_: T) {}

    #[tokio::test]
    async fn serve_futures_can_be_spawned() {
        let server = Server::new("127.0.0.1:0", ServerOptions::with_router(router())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tls_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pki = crate::test_support::TestPki::generate();

        assert_send(server.serve(listener));
        assert_send(server.serve_tls(tls_listener, pki.server_config()));
        assert_send(server.listen_and_serve());
        assert_send(server.listen_and_serve_tls("cert.pem", "key.pem"));
    }

    #[tokio::test]
    async fn closed_server_refuses_to_serve() {
        let server = Server::new("127.0.0.1:0", ServerOptions::with_router(router())).unwrap();
        server.close();
        assert!(server.is_closed());
        let err = server.listen_and_serve().await.unwrap_err();
        assert!(matches!(err, ServerError::Closed));
    }

    #[tokio::test]
    async fn close_stops_a_running_accept_loop() {
        let server = Arc::new(
            Server::new("127.0.0.1:0", ServerOptions::with_router(router())).unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let running = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.close();

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("accept loop did not stop")
            .unwrap()
            .unwrap();

        // The socket was released, so the port can be bound again.
        TcpListener::bind(addr).await.unwrap();
    }
}
