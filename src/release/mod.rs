//! Release resolution
//!
//! Talks to the remote release host, picks the latest eligible release,
//! finds the configured artifact in it and decides whether it has to be
//! downloaded into the cache.

mod github;
mod host;
mod key;
mod resolver;

pub use github::GithubReleases;
pub use host::{AssetDownload, ReleaseHost};
pub use key::CacheKey;
pub use resolver::{DeployKey, Resolver};

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A release as reported by the host
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    pub html_url: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// A downloadable file attached to a release
#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub name: String,
    pub browser_download_url: String,
    pub updated_at: DateTime<Utc>,
}

/// The configured artifact resolved within one release
///
/// Produced fresh by every resolution; only its cache key and bytes persist.
#[derive(Debug, Clone)]
pub struct ReleaseArtifact {
    pub release_id: u64,
    pub tag: String,
    pub release_url: String,
    pub asset_id: u64,
    pub asset_name: String,
    pub download_url: String,
    pub updated_at: DateTime<Utc>,
    pub cache_key: CacheKey,
}
