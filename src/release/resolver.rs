//! Release resolver
//!
//! Decides which release is current on the host, whether its artifact needs
//! downloading, and records successful shipments back to the host.

use crate::cache::CacheStore;
use crate::config::schema::{PrereleaseFallback, RepositoryConfig};
use crate::error::{PullshipError, PullshipResult};
use crate::release::host::{AssetDownload, ReleaseHost};
use crate::release::{CacheKey, Release, ReleaseArtifact};
use crate::stamp;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of a successful deploy-key resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployKey {
    /// Cache key to deploy
    pub key: CacheKey,
    /// Whether the artifact was fetched from the host this cycle
    pub downloaded: bool,
}

/// Resolves releases for one repository against a host and a cache
pub struct Resolver {
    host: Arc<dyn ReleaseHost>,
    cache: Arc<dyn CacheStore>,
    repo: RepositoryConfig,
}

impl Resolver {
    pub fn new(host: Arc<dyn ReleaseHost>, cache: Arc<dyn CacheStore>, repo: RepositoryConfig) -> Self {
        Self { host, cache, repo }
    }

    /// Repository settings this resolver targets
    pub fn repository(&self) -> &RepositoryConfig {
        &self.repo
    }

    /// Repository page URL on the web host
    pub fn repository_url(&self) -> String {
        format!("{}/{}", self.owner_url(), self.repo.name)
    }

    /// Owner page URL on the web host
    pub fn owner_url(&self) -> String {
        format!("https://{}/{}", self.host.web_host(), self.repo.owner)
    }

    /// Owner avatar URL
    pub fn owner_icon_url(&self) -> String {
        format!("{}.png?size=200", self.owner_url())
    }

    /// Resolve the configured artifact in the latest eligible release
    pub async fn resolve(&self, cancel: &CancellationToken) -> PullshipResult<ReleaseArtifact> {
        let release = self.latest(cancel).await?;

        let asset = release
            .assets
            .iter()
            .find(|a| a.name == self.repo.artifact)
            .ok_or_else(|| PullshipError::ArtifactNotFound {
                artifact: self.repo.artifact.clone(),
                tag: release.tag_name.clone(),
            })?;
        debug!(
            release = %release.tag_name,
            asset_id = asset.id,
            updated_at = %asset.updated_at,
            "Fetched artifact metadata"
        );

        let cache_key = CacheKey::derive(&asset.browser_download_url, asset.updated_at)?;

        Ok(ReleaseArtifact {
            release_id: release.id,
            tag: release.tag_name.clone(),
            release_url: release.html_url.clone(),
            asset_id: asset.id,
            asset_name: asset.name.clone(),
            download_url: asset.browser_download_url.clone(),
            updated_at: asset.updated_at,
            cache_key,
        })
    }

    /// Latest eligible release: drafts never qualify, pre-releases only in pre-release mode
    async fn latest(&self, cancel: &CancellationToken) -> PullshipResult<Release> {
        let (owner, name) = (self.repo.owner.as_str(), self.repo.name.as_str());

        if self.repo.prerelease {
            let releases = self.host.list_releases(owner, name, 1, cancel).await?;
            if let Some(release) = releases.into_iter().find(|r| !r.draft) {
                return Ok(release);
            }

            match self.repo.prerelease_fallback {
                PrereleaseFallback::Error => {
                    return Err(PullshipError::NoEligibleRelease {
                        repository: self.repo.slug(),
                    })
                }
                PrereleaseFallback::Latest => {
                    debug!("No non-draft release on the first page, falling back to latest");
                }
            }
        }

        let release = self.host.latest_release(owner, name, cancel).await?;
        if release.draft {
            return Err(PullshipError::NoEligibleRelease {
                repository: self.repo.slug(),
            });
        }
        Ok(release)
    }

    /// Decide what to deploy for a freshly resolved artifact
    ///
    /// - current pointer equals the key and the key is cached: `NothingToDeploy`
    /// - key cached but not current: promote it without downloading
    /// - key not cached: download once, then promote
    pub async fn resolve_deploy_key(
        &self,
        artifact: &ReleaseArtifact,
        cancel: &CancellationToken,
    ) -> PullshipResult<DeployKey> {
        let key = &artifact.cache_key;
        let current = self.cache.current().await?;
        let cached = self.cache.contains(key.as_str()).await?;

        if cached && current.as_deref() == Some(key.as_str()) {
            return Err(PullshipError::NothingToDeploy {
                key: key.to_string(),
            });
        }

        let downloaded = if cached {
            info!("Promoting cached artifact {}", key);
            false
        } else {
            self.download(artifact, cancel).await?;
            true
        };

        self.cache.set_current(key.as_str()).await?;

        Ok(DeployKey {
            key: key.clone(),
            downloaded,
        })
    }

    /// Stream the artifact into the cache, leaving nothing behind on failure
    async fn download(&self, artifact: &ReleaseArtifact, cancel: &CancellationToken) -> PullshipResult<()> {
        let key = artifact.cache_key.as_str();
        let staged = self.cache.staging_path(key)?;

        let size = match self.fetch_into(artifact, &staged, cancel).await {
            Ok(size) => size,
            Err(e) => {
                self.cache.discard(key).await;
                return Err(e);
            }
        };
        info!("Downloaded {} bytes from {}", size, artifact.download_url);

        self.cache.commit(key).await?;
        info!("Cached as {}", artifact.cache_key);
        Ok(())
    }

    async fn fetch_into(
        &self,
        artifact: &ReleaseArtifact,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PullshipResult<u64> {
        let (owner, name) = (self.repo.owner.as_str(), self.repo.name.as_str());

        match self
            .host
            .download_asset(owner, name, artifact.asset_id, dest, cancel)
            .await?
        {
            AssetDownload::Saved(size) => Ok(size),
            AssetDownload::Redirect(url) => {
                debug!("Asset redirected to {}", url);
                self.host.fetch_redirect(&url, dest, cancel).await
            }
        }
    }

    /// Upload a shipping record naming this host to the deployed release
    ///
    /// A no-op when `disable_record_shipping` is set.
    pub async fn record_ship(
        &self,
        artifact: &ReleaseArtifact,
        cancel: &CancellationToken,
    ) -> PullshipResult<()> {
        if self.repo.disable_record_shipping {
            debug!("Shipping record disabled");
            return Ok(());
        }

        let (filename, body) = shipping_record(&stamp::hostname(), Utc::now());
        self.host
            .upload_asset(
                &self.repo.owner,
                &self.repo.name,
                artifact.release_id,
                &filename,
                body.into_bytes(),
                "text/plain",
                cancel,
            )
            .await
            .map_err(|e| match e {
                PullshipError::Cancelled(what) => PullshipError::Cancelled(what),
                other => PullshipError::ShippingRecord(other.to_string()),
            })?;

        info!("Recorded shipping as {}", filename);
        Ok(())
    }
}

/// Shipping record file name and contents for `hostname` at `at`
fn shipping_record(hostname: &str, at: DateTime<Utc>) -> (String, String) {
    let info = format!(
        "shipped to {} at {}",
        hostname.to_lowercase(),
        stamp::compact_utc(at)
    );
    (format!("{}.txt", info.replace(' ', "_")), info)
}
