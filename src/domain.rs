//! Domain key normalization.
//!
//! Every piece of per-domain state (rate limiter buckets, circuit breakers,
//! robots entries) is partitioned by the same key, so the same logical site
//! always lands in one slot.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Normalized `scheme://host[:port]` key for per-domain state.
///
/// The port is only included when it differs from the scheme's default,
/// so `https://Example.com:443/a` and `https://example.com/b` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainKey(String);

impl DomainKey {
    /// Derive the key from an already parsed URL.
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?.trim_end_matches('.');
        if host.is_empty() {
            return None;
        }

        // Url::port() is None when the port equals the scheme default
        let key = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };
        Some(Self(key.to_ascii_lowercase()))
    }

    /// Parse a URL string and derive its key.
    pub fn parse(url: &str) -> Option<Self> {
        Url::parse(url).ok().as_ref().and_then(Self::from_url)
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The robots.txt location for this domain.
    pub fn robots_url(&self) -> String {
        format!("{}/robots.txt", self.0)
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
