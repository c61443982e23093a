//! Fixtures shared by unit and integration tests: a throwaway PKI and a
//! recorded ClientHello that can be replayed byte for byte.
//!
//! rustls randomises the order of most ClientHello extensions on every
//! connection, so two handshakes from one `ClientConfig` rarely share a JA3
//! digest. Tests that depend on a digest replay one [`RecordedHello`]
//! instead of opening fresh rustls connections.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ja3rp_core::{compute_ja3, parse_client_hello_message, Ja3Fingerprint};
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::handshake::read_client_hello;
use crate::tls::crypto_provider;

/// The alert record a rejected client receives: fatal `handshake_failure`.
pub const HANDSHAKE_FAILURE_ALERT: [u8; 7] = [0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 40];

/// Throwaway CA plus a `localhost` leaf signed by it.
#[derive(Clone)]
pub struct TestPki {
    pub ca_der: CertificateDer<'static>,
    pub leaf_der: CertificateDer<'static>,
    pub leaf_pem: String,
    pub key_der: Vec<u8>,
    pub key_pem: String,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&leaf_key, &ca, &ca_key)
            .unwrap();

        Self {
            ca_der: ca.der().clone(),
            leaf_der: leaf.der().clone(),
            leaf_pem: leaf.pem(),
            key_der: leaf_key.serialize_der(),
            key_pem: leaf_key.serialize_pem(),
        }
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));
        crate::tls::server_config(vec![self.leaf_der.clone()], key).unwrap()
    }

    /// HTTP/1.1 client that trusts the test CA.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config_with_alpn(&[b"http/1.1"])
    }

    pub fn client_config_with_alpn(&self, alpn: &[&[u8]]) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).unwrap();
        let mut config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
        Arc::new(config)
    }
}

/// One ClientHello flight as it left a real client, with its fingerprint.
#[derive(Debug, Clone)]
pub struct RecordedHello {
    /// Record bytes exactly as written to the wire.
    pub raw: Vec<u8>,
    pub ja3: Ja3Fingerprint,
}

impl RecordedHello {
    /// Let a rustls client start a handshake against an in-memory pipe and
    /// keep the first flight it sends.
    pub async fn record(client: Arc<ClientConfig>) -> Self {
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let name = ServerName::try_from("localhost").unwrap();

        let server = async move {
            let captured = read_client_hello(&mut server_io).await;
            // Hang up so the client gives up instead of waiting for a reply.
            drop(server_io);
            captured
        };
        let client = TlsConnector::from(client).connect(name, client_io);
        let (captured, _) = tokio::join!(server, client);
        let captured = captured.unwrap();

        let info = parse_client_hello_message(&captured.message).unwrap();
        Self {
            raw: captured.raw,
            ja3: compute_ja3(&info),
        }
    }

    pub fn digest(&self) -> String {
        self.ja3.digest.clone()
    }

    /// Send the recorded flight to `addr` and return the first seven bytes
    /// of the reply: a full alert record, or the start of a ServerHello.
    pub async fn replay(&self, addr: SocketAddr) -> io::Result<[u8; 7]> {
        let mut tcp = TcpStream::connect(addr).await?;
        tcp.write_all(&self.raw).await?;
        let mut reply = [0u8; 7];
        tokio::time::timeout(Duration::from_secs(5), tcp.read_exact(&mut reply))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no reply"))??;
        Ok(reply)
    }
}

/// Whether a reply from [`RecordedHello::replay`] means the server went on
/// with the handshake.
pub fn is_server_hello(reply: &[u8; 7]) -> bool {
    // Handshake record carrying a ServerHello.
    reply[0] == 0x16 && reply[5] == 0x02
}
