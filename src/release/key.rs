//! Cache key derivation
//!
//! A cache key is `<host>--<unix timestamp>-<request path>` with every `/`
//! rewritten to `-`. The asset's last-modified timestamp is the only
//! uniqueness signal: two uploads to the same path within one second collide.

use crate::error::{PullshipError, PullshipResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Deterministic identifier of one artifact version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from its three inputs
    pub fn from_parts(host: &str, unix_timestamp: i64, request_path: &str) -> Self {
        let raw = format!(
            "{}--{}-{}",
            host,
            unix_timestamp,
            request_path.trim_start_matches('/')
        );
        Self(raw.replace('/', "-"))
    }

    /// Derive the key for an asset from its download URL and last-modified time
    pub fn derive(download_url: &str, updated_at: DateTime<Utc>) -> PullshipResult<Self> {
        let url = Url::parse(download_url).map_err(|e| PullshipError::InvalidDownloadUrl {
            url: download_url.to_string(),
            reason: e.to_string(),
        })?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(PullshipError::InvalidDownloadUrl {
                    url: download_url.to_string(),
                    reason: "missing host".to_string(),
                })
            }
        };

        let mut request = url.path().to_string();
        if let Some(query) = url.query() {
            request.push('?');
            request.push_str(query);
        }

        Ok(Self::from_parts(&host, updated_at.timestamp(), &request))
    }

    /// Wrap a key read back from the cache
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
