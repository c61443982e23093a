//! Admit/deny decisions for a (JA3 digest, client address) pair.
//!
//! Blacklists are checked first and always win. A non-empty whitelist turns
//! the policy into a closed allow-list for its dimension; an empty one means
//! "no restriction".

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use serde::Serialize;
use tracing::warn;

/// Outcome of [`AccessPolicy::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum Decision {
    Admit,
    Deny(DenyReason),
}

/// Which rule rejected the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    AddressBlacklisted,
    DigestBlacklisted,
    AddressNotWhitelisted,
    DigestNotWhitelisted,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenyReason::AddressBlacklisted => "client address is blacklisted",
            DenyReason::DigestBlacklisted => "JA3 digest is blacklisted",
            DenyReason::AddressNotWhitelisted => "client address is not whitelisted",
            DenyReason::DigestNotWhitelisted => "JA3 digest is not whitelisted",
        };
        f.write_str(s)
    }
}

/// Immutable whitelist/blacklist sets for JA3 digests and client addresses.
///
/// Built once and shared read-only between handshakes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    ja3_whitelist: HashSet<String>,
    ja3_blacklist: HashSet<String>,
    ip_whitelist: HashSet<IpAddr>,
    ip_blacklist: HashSet<IpAddr>,
}

impl AccessPolicy {
    /// A policy with no lists: every client is admitted.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn builder() -> AccessPolicyBuilder {
        AccessPolicyBuilder::default()
    }

    /// Decide whether a client may finish its handshake.
    pub fn evaluate(&self, digest: &str, addr: IpAddr) -> Decision {
        let addr = addr.to_canonical();

        if self.ip_blacklist.contains(&addr) {
            return Decision::Deny(DenyReason::AddressBlacklisted);
        }
        if self.ja3_blacklist.contains(digest) {
            return Decision::Deny(DenyReason::DigestBlacklisted);
        }
        if !self.ip_whitelist.is_empty() && !self.ip_whitelist.contains(&addr) {
            return Decision::Deny(DenyReason::AddressNotWhitelisted);
        }
        if !self.ja3_whitelist.is_empty() && !self.ja3_whitelist.contains(digest) {
            return Decision::Deny(DenyReason::DigestNotWhitelisted);
        }
        Decision::Admit
    }

    /// True when no list is configured.
    pub fn is_unrestricted(&self) -> bool {
        self.ja3_whitelist.is_empty()
            && self.ja3_blacklist.is_empty()
            && self.ip_whitelist.is_empty()
            && self.ip_blacklist.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AccessPolicyBuilder {
    policy: AccessPolicy,
}

impl AccessPolicyBuilder {
    pub fn ja3_whitelist<I, S>(mut self, digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.ja3_whitelist.extend(digests.into_iter().map(Into::into));
        self
    }

    pub fn ja3_blacklist<I, S>(mut self, digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.ja3_blacklist.extend(digests.into_iter().map(Into::into));
        self
    }

    pub fn ip_whitelist<I>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        self.policy
            .ip_whitelist
            .extend(addrs.into_iter().map(|a| a.to_canonical()));
        self
    }

    pub fn ip_blacklist<I>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        self.policy
            .ip_blacklist
            .extend(addrs.into_iter().map(|a| a.to_canonical()));
        self
    }

    pub fn build(self) -> AccessPolicy {
        for digest in self
            .policy
            .ja3_whitelist
            .iter()
            .chain(self.policy.ja3_blacklist.iter())
        {
            if !looks_like_digest(digest) {
                warn!("JA3 list entry {:?} is not a 32-char lowercase hex digest and will never match", digest);
            }
        }
        self.policy
    }
}

fn looks_like_digest(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
