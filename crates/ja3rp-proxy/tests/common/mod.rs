#![allow(dead_code)]

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use hyper::header::HOST;
use hyper::{Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use ja3rp_proxy::Server;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;

pub use ja3rp_proxy::test_support::{
    is_server_hello, RecordedHello, TestPki, HANDSHAKE_FAILURE_ALERT,
};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// `TEST_SERVER_PORT` plus `offset` when the variable is set, otherwise an
/// ephemeral port.
pub fn test_port(offset: u16) -> u16 {
    std::env::var("TEST_SERVER_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .map(|base| base + offset)
        .unwrap_or(0)
}

pub async fn bind(offset: u16) -> TcpListener {
    TcpListener::bind(("127.0.0.1", test_port(offset)))
        .await
        .unwrap()
}

/// Serve plain HTTP in the background.
pub async fn start_plain(server: Arc<Server>, offset: u16) -> SocketAddr {
    let listener = bind(offset).await;
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    addr
}

/// Serve HTTPS in the background.
pub async fn start_tls(server: Arc<Server>, pki: &TestPki, offset: u16) -> SocketAddr {
    let listener = bind(offset).await;
    let addr = listener.local_addr().unwrap();
    let config = pki.server_config();
    tokio::spawn(async move { server.serve_tls(listener, config).await });
    addr
}

async fn read_response(
    resp: hyper::Response<hyper::body::Incoming>,
) -> Result<(StatusCode, String), BoxError> {
    let status = resp.status();
    let bytes = axum::body::to_bytes(Body::new(resp.into_body()), usize::MAX).await?;
    Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
}

pub async fn http_get(addr: SocketAddr, path: &str) -> Result<(StatusCode, String), BoxError> {
    let tcp = TcpStream::connect(addr).await?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tcp)).await?;
    tokio::spawn(conn);

    let req = Request::get(path)
        .header(HOST, addr.to_string())
        .body(Body::empty())?;
    read_response(sender.send_request(req).await?).await
}

/// GET over HTTP/1.1 on a fresh TLS connection. Handshake rejections come
/// back as the error.
pub async fn https_get(
    addr: SocketAddr,
    client: Arc<ClientConfig>,
    path: &str,
) -> Result<(StatusCode, String), BoxError> {
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from("localhost")?;
    let tls = TlsConnector::from(client).connect(name, tcp).await?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
    tokio::spawn(conn);

    let req = Request::get(path)
        .header(HOST, "localhost")
        .body(Body::empty())?;
    read_response(sender.send_request(req).await?).await
}

/// GET over HTTP/2 on a fresh TLS connection.
pub async fn https_get_h2(
    addr: SocketAddr,
    client: Arc<ClientConfig>,
    path: &str,
) -> Result<(StatusCode, String), BoxError> {
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from("localhost")?;
    let tls = TlsConnector::from(client).connect(name, tcp).await?;

    let (mut sender, conn) =
        hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(tls)).await?;
    tokio::spawn(conn);

    let req = Request::get(format!("https://localhost{}", path)).body(Body::empty())?;
    read_response(sender.send_request(req).await?).await
}

pub fn is_hex_digest(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
