//! Reverse-proxy forwarding to a single destination origin.

use std::net::IpAddr;

use axum::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::tls::crypto_provider;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection-scoped headers that must not cross the proxy (RFC 9110 §7.6.1).
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Check that `uri` names an http(s) origin with a host.
pub fn validate_destination(uri: &Uri) -> Result<(), ConfigError> {
    let scheme_ok = matches!(uri.scheme_str(), Some("http") | Some("https"));
    let host_ok = uri.host().map(|h| !h.is_empty()).unwrap_or(false);
    if scheme_ok && host_ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidDestination(uri.to_string()))
    }
}

/// Forwards every request, whatever its path, to one origin.
#[derive(Clone)]
pub struct Forwarder {
    destination: Uri,
    scheme: Scheme,
    authority: Authority,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl Forwarder {
    pub fn new(destination: Uri) -> Result<Self, ConfigError> {
        validate_destination(&destination)?;
        let invalid = || ConfigError::InvalidDestination(destination.to_string());
        let scheme = destination.scheme().cloned().ok_or_else(invalid)?;
        let authority = destination.authority().cloned().ok_or_else(invalid)?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| ConfigError::Tls(format!("failed to build origin connector: {}", e)))?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            destination,
            scheme,
            authority,
            client,
        })
    }

    pub fn destination(&self) -> &Uri {
        &self.destination
    }

    /// Send `req` to the origin and hand back its response. Origin failures
    /// become `502 Bad Gateway`.
    pub async fn forward<B>(&self, req: Request<B>, client_ip: IpAddr) -> Response<Body>
    where
        B: hyper::body::Body<Data = bytes::Bytes> + Send + 'static,
        B::Error: Into<axum::BoxError>,
    {
        let (mut parts, body) = req.into_parts();

        parts.uri = match self.upstream_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                warn!("cannot build upstream URI for {}: {}", parts.uri, e);
                return bad_gateway();
            }
        };
        // HTTP/2 requests carry the authority in the URI only.
        if !parts.headers.contains_key(HOST) {
            if let Ok(value) = HeaderValue::from_str(self.authority.as_str()) {
                parts.headers.insert(HOST, value);
            }
        }
        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, client_ip);
        parts.version = hyper::Version::HTTP_11;

        debug!("forwarding {} {}", parts.method, parts.uri);
        let upstream = Request::from_parts(parts, Body::new(body));

        match self.client.request(upstream).await {
            Ok(resp) => {
                let (mut parts, body) = resp.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                warn!("destination {} unreachable: {}", self.destination, e);
                bad_gateway()
            }
        }
    }

    /// Destination scheme and authority, destination path joined with the
    /// request path, request query.
    fn upstream_uri(&self, incoming: &Uri) -> Result<Uri, hyper::http::Error> {
        let base_path = self.destination.path();
        let req_path = incoming.path();
        let mut path = match (base_path.ends_with('/'), req_path.starts_with('/')) {
            (true, true) => format!("{}{}", base_path, &req_path[1..]),
            (false, false) => format!("{}/{}", base_path, req_path),
            _ => format!("{}{}", base_path, req_path),
        };
        match (self.destination.query(), incoming.query()) {
            (Some(a), Some(b)) => path = format!("{}?{}&{}", path, a, b),
            (Some(q), None) | (None, Some(q)) => path = format!("{}?{}", path, q),
            (None, None) => {}
        }

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(PathAndQuery::try_from(path)?)
            .build()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn bad_gateway() -> Response<Body> {
    let mut resp = Response::new(Body::from("bad gateway"));
    *resp.status_mut() = StatusCode::BAD_GATEWAY;
    resp
}
