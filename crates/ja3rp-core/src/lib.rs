//! JA3 fingerprinting of TLS ClientHello messages and the fingerprint/address
//! access policy evaluated against them.

pub mod fingerprint;
pub mod policy;

pub use fingerprint::clienthello::{parse_client_hello, parse_client_hello_message, ParseError};
pub use fingerprint::ja3::compute_ja3;
pub use fingerprint::types::{ClientHelloInfo, Ja3Fingerprint};
pub use policy::{AccessPolicy, Decision, DenyReason};
