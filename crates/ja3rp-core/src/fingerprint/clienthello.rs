use crate::fingerprint::types::ClientHelloInfo;
use tls_parser::nom::Err as NomErr;
use tls_parser::{
    parse_tls_extension, parse_tls_message_handshake, TlsExtension, TlsMessage,
    TlsMessageHandshake,
};

/// Content type + version + length.
pub const RECORD_HEADER_LEN: usize = 5;
/// Message type + 24-bit length.
pub const HANDSHAKE_HEADER_LEN: usize = 4;
/// Largest plaintext fragment a TLS record may carry (2^14).
pub const MAX_FRAGMENT_LEN: usize = 16384;

pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
pub const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_ALPN: u16 = 0x0010;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("not enough data: need at least {0} bytes")]
    NotEnoughData(usize),
    #[error("not a TLS handshake record")]
    NotHandshake,
    #[error("not a ClientHello message")]
    NotClientHello,
    #[error("record fragment of {0} bytes exceeds the TLS limit")]
    RecordTooLarge(usize),
    #[error("malformed extension block")]
    MalformedExtensions,
    #[error("TLS parse error: {0}")]
    TlsParseError(String),
}

/// Parse a single TLS plaintext record carrying a complete ClientHello.
///
/// The input starts with the 5-byte record header. ClientHellos that are split
/// over several records must be reassembled first and handed to
/// [`parse_client_hello_message`].
pub fn parse_client_hello(raw: &[u8]) -> Result<ClientHelloInfo, ParseError> {
    if raw.len() < RECORD_HEADER_LEN {
        return Err(ParseError::NotEnoughData(RECORD_HEADER_LEN));
    }

    if raw[0] != CONTENT_TYPE_HANDSHAKE {
        return Err(ParseError::NotHandshake);
    }

    let fragment_len = u16::from_be_bytes([raw[3], raw[4]]) as usize;
    if fragment_len > MAX_FRAGMENT_LEN {
        return Err(ParseError::RecordTooLarge(fragment_len));
    }

    let end = RECORD_HEADER_LEN + fragment_len;
    if raw.len() < end {
        return Err(ParseError::NotEnoughData(end));
    }

    parse_client_hello_message(&raw[RECORD_HEADER_LEN..end])
}

/// Parse a reassembled handshake message (type, 24-bit length, body) into a
/// `ClientHelloInfo`. Every list keeps its wire order.
pub fn parse_client_hello_message(msg: &[u8]) -> Result<ClientHelloInfo, ParseError> {
    if msg.len() < HANDSHAKE_HEADER_LEN {
        return Err(ParseError::NotEnoughData(HANDSHAKE_HEADER_LEN));
    }

    if msg[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(ParseError::NotClientHello);
    }

    let (_, parsed) = parse_tls_message_handshake(msg).map_err(|e| match e {
        NomErr::Incomplete(needed) => {
            let n = match needed {
                tls_parser::nom::Needed::Size(s) => s.get(),
                tls_parser::nom::Needed::Unknown => 0,
            };
            ParseError::NotEnoughData(msg.len() + n)
        }
        _ => ParseError::TlsParseError(format!("{}", e)),
    })?;

    let ch = match parsed {
        TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) => ch,
        _ => return Err(ParseError::NotClientHello),
    };

    let mut info = ClientHelloInfo {
        tls_version: ch.version.0,
        cipher_suites: ch.ciphers.iter().map(|c| c.0).collect(),
        ..ClientHelloInfo::default()
    };

    if let Some(ext_data) = ch.ext {
        read_extensions(ext_data, &mut info)?;
    }

    Ok(info)
}

/// Walk the raw extension block so that every type code is recorded exactly
/// as sent, including ones `tls-parser` has no variant for.
fn read_extensions(mut data: &[u8], info: &mut ClientHelloInfo) -> Result<(), ParseError> {
    while !data.is_empty() {
        if data.len() < 4 {
            return Err(ParseError::MalformedExtensions);
        }
        let ext_type = u16::from_be_bytes([data[0], data[1]]);
        let ext_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if data.len() < 4 + ext_len {
            return Err(ParseError::MalformedExtensions);
        }
        let (ext, rest) = data.split_at(4 + ext_len);
        info.extensions.push(ext_type);

        match ext_type {
            EXT_SUPPORTED_GROUPS | EXT_EC_POINT_FORMATS => decode_extension(ext, info)?,
            // Informational only: a client with an odd SNI or ALPN encoding
            // still gets fingerprinted.
            EXT_SERVER_NAME | EXT_ALPN => {
                let _ = decode_extension(ext, info);
            }
            _ => {}
        }

        data = rest;
    }
    Ok(())
}

fn decode_extension(raw: &[u8], info: &mut ClientHelloInfo) -> Result<(), ParseError> {
    let (_, ext) =
        parse_tls_extension(raw).map_err(|e| ParseError::TlsParseError(format!("{}", e)))?;

    match ext {
        TlsExtension::EllipticCurves(curves) => {
            info.elliptic_curves = curves.iter().map(|c| c.0).collect();
        }
        TlsExtension::EcPointFormats(formats) => {
            info.ec_point_formats = formats.to_vec();
        }
        TlsExtension::SNI(sni_list) => {
            for (_, name_bytes) in sni_list {
                if let Ok(name) = std::str::from_utf8(name_bytes) {
                    info.server_name = Some(name.to_string());
                }
            }
        }
        TlsExtension::ALPN(protocols) => {
            info.alpn_protocols = protocols
                .iter()
                .filter_map(|p| std::str::from_utf8(p).ok())
                .map(|s| s.to_string())
                .collect();
        }
        _ => {}
    }
    Ok(())
}
