//! Server-side TLS handshake with a JA3 checkpoint.
//!
//! The ClientHello flight is read here, straight off the transport, before
//! rustls sees a single byte. Once the client is fingerprinted and the policy
//! has ruled, a denied client gets a fatal `handshake_failure` alert and the
//! socket is closed; an admitted client has its bytes replayed into a regular
//! rustls handshake through [`Rewind`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use ja3rp_core::fingerprint::clienthello::{
    CONTENT_TYPE_HANDSHAKE, HANDSHAKE_HEADER_LEN, HANDSHAKE_TYPE_CLIENT_HELLO, MAX_FRAGMENT_LEN,
    RECORD_HEADER_LEN,
};
use ja3rp_core::{compute_ja3, parse_client_hello_message, AccessPolicy, Decision, ParseError};
use rustls::AlertDescription;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, trace, warn};

use crate::context::ConnectionContext;
use crate::error::HandshakeError;
use crate::rewind::Rewind;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a reassembled ClientHello. Real ones are a few hundred
/// bytes; post-quantum key shares push them past 1 KiB.
const MAX_CLIENT_HELLO_LEN: usize = 64 * 1024;

const CONTENT_TYPE_ALERT: u8 = 0x15;
const ALERT_LEVEL_FATAL: u8 = 2;

/// Progress of one inbound handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Accepted,
    ClientHelloRead,
    Fingerprinted,
    Admitted,
    Denied,
    HandshakeCompleting,
    Established,
    Aborted,
}

impl HandshakeState {
    pub fn can_advance_to(self, next: HandshakeState) -> bool {
        use HandshakeState::*;
        matches!(
            (self, next),
            (Accepted, ClientHelloRead)
                | (ClientHelloRead, Fingerprinted)
                | (Fingerprinted, Admitted)
                | (Fingerprinted, Denied)
                | (Admitted, HandshakeCompleting)
                | (HandshakeCompleting, Established)
                | (Denied, Aborted)
                | (Accepted, Aborted)
                | (ClientHelloRead, Aborted)
                | (HandshakeCompleting, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Aborted)
    }
}

struct Handshake {
    peer: SocketAddr,
    state: HandshakeState,
}

impl Handshake {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            state: HandshakeState::Accepted,
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal handshake transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "handshake transition");
        self.state = next;
    }
}

/// Bytes consumed from the transport while reading the ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedHello {
    /// Every record byte read, headers included, for replay.
    pub raw: Vec<u8>,
    /// The reassembled ClientHello handshake message.
    pub message: Vec<u8>,
}

/// Read handshake records until one complete ClientHello message is buffered.
pub async fn read_client_hello<S>(io: &mut S) -> Result<CapturedHello, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut raw = Vec::with_capacity(1024);
    let mut message = Vec::with_capacity(1024);

    loop {
        let mut header = [0u8; RECORD_HEADER_LEN];
        io.read_exact(&mut header).await?;
        raw.extend_from_slice(&header);

        if header[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(ParseError::NotHandshake.into());
        }
        if header[1] != 0x03 {
            return Err(ParseError::TlsParseError(format!(
                "unsupported record version 0x{:02x}{:02x}",
                header[1], header[2]
            ))
            .into());
        }

        let fragment_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if fragment_len == 0 {
            return Err(ParseError::TlsParseError("empty handshake fragment".to_string()).into());
        }
        if fragment_len > MAX_FRAGMENT_LEN {
            return Err(ParseError::RecordTooLarge(fragment_len).into());
        }

        let start = raw.len();
        raw.resize(start + fragment_len, 0);
        io.read_exact(&mut raw[start..]).await?;
        message.extend_from_slice(&raw[start..]);

        if message.len() < HANDSHAKE_HEADER_LEN {
            continue;
        }
        if message[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
            return Err(ParseError::NotClientHello.into());
        }
        let body_len = u32::from_be_bytes([0, message[1], message[2], message[3]]) as usize;
        let total = HANDSHAKE_HEADER_LEN + body_len;
        if total > MAX_CLIENT_HELLO_LEN {
            return Err(ParseError::TlsParseError(format!(
                "ClientHello of {} bytes exceeds {} byte limit",
                total, MAX_CLIENT_HELLO_LEN
            ))
            .into());
        }
        if message.len() >= total {
            message.truncate(total);
            return Ok(CapturedHello { raw, message });
        }
    }
}

/// Accepts TLS connections, admitting or rejecting each one on its JA3
/// fingerprint and address before the server sends its first flight.
#[derive(Clone)]
pub struct Ja3Acceptor {
    tls: TlsAcceptor,
    policy: Arc<ArcSwap<AccessPolicy>>,
    timeout: Duration,
}

impl Ja3Acceptor {
    pub fn new(config: Arc<rustls::ServerConfig>, policy: Arc<ArcSwap<AccessPolicy>>) -> Self {
        Self {
            tls: TlsAcceptor::from(config),
            policy,
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Bound on reading the ClientHello, and separately on finishing the
    /// rustls handshake once admitted.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the handshake on `io`. On success the stream is ready for
    /// application data and the context carries the client's fingerprint.
    pub async fn accept<S>(
        &self,
        mut io: S,
        remote_addr: SocketAddr,
    ) -> Result<(TlsStream<Rewind<S>>, ConnectionContext), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut hs = Handshake::new(remote_addr);
        let mut ctx = ConnectionContext::new(remote_addr);

        let captured = match tokio::time::timeout(self.timeout, read_client_hello(&mut io)).await {
            Ok(Ok(captured)) => captured,
            Ok(Err(e)) => {
                // Something that is not TLS at all gets no alert.
                if matches!(e, HandshakeError::Parse(ref p) if *p != ParseError::NotHandshake) {
                    send_alert(&mut io, AlertDescription::DecodeError).await;
                }
                hs.advance(HandshakeState::Aborted);
                return Err(e);
            }
            Err(_) => {
                hs.advance(HandshakeState::Aborted);
                return Err(HandshakeError::Timeout);
            }
        };
        hs.advance(HandshakeState::ClientHelloRead);

        let info = match parse_client_hello_message(&captured.message) {
            Ok(info) => info,
            Err(e) => {
                send_alert(&mut io, AlertDescription::DecodeError).await;
                hs.advance(HandshakeState::Aborted);
                return Err(e.into());
            }
        };

        let ja3 = compute_ja3(&info);
        debug!(
            peer = %remote_addr,
            sni = info.server_name.as_deref().unwrap_or("-"),
            ja3 = %ja3.digest,
            ja3_raw = %ja3.raw,
            "ClientHello fingerprinted"
        );
        ctx.ja3 = Some(ja3);
        ctx.server_name = info.server_name;
        hs.advance(HandshakeState::Fingerprinted);

        ctx.decision = self
            .policy
            .load()
            .evaluate(ctx.ja3_digest(), remote_addr.ip());

        if let Decision::Deny(reason) = ctx.decision {
            hs.advance(HandshakeState::Denied);
            let digest = ctx.ja3_digest().to_string();
            warn!(peer = %remote_addr, ja3 = %digest, %reason, "rejecting TLS handshake");
            send_alert(&mut io, AlertDescription::HandshakeFailure).await;
            hs.advance(HandshakeState::Aborted);
            return Err(HandshakeError::Denied { reason, digest });
        }
        hs.advance(HandshakeState::Admitted);

        hs.advance(HandshakeState::HandshakeCompleting);
        let accept = self.tls.accept(Rewind::new(io, captured.raw));
        let stream = match tokio::time::timeout(self.timeout, accept).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                hs.advance(HandshakeState::Aborted);
                return Err(HandshakeError::Tls(e));
            }
            Err(_) => {
                hs.advance(HandshakeState::Aborted);
                return Err(HandshakeError::Timeout);
            }
        };
        hs.advance(HandshakeState::Established);

        Ok((stream, ctx))
    }
}

/// Write a plaintext fatal alert record and close the write side.
async fn send_alert<S>(io: &mut S, description: AlertDescription)
where
    S: AsyncWrite + Unpin,
{
    let record = [
        CONTENT_TYPE_ALERT,
        0x03,
        0x03,
        0x00,
        0x02,
        ALERT_LEVEL_FATAL,
        u8::from(description),
    ];
    let result = async {
        io.write_all(&record).await?;
        io.flush().await?;
        io.shutdown().await
    }
    .await;
    if let Err(e) = result {
        debug!("failed to deliver {:?} alert: {}", description, e);
    }
}
