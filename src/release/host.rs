//! Release host abstraction
//!
//! Provides a trait for the remote operations the resolver needs, so the
//! daemon can be driven against GitHub or an in-memory host in tests.

use crate::error::PullshipResult;
use crate::release::Release;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Result of requesting an asset
#[derive(Debug)]
pub enum AssetDownload {
    /// The host served the asset; this many bytes were streamed to disk
    Saved(u64),
    /// The host answered with a one-time redirect to the real location
    Redirect(String),
}

/// Remote release host interface
///
/// Every call takes the cycle's cancellation token so a shutdown signal
/// aborts in-flight requests instead of waiting for the request timeout.
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    /// One page of releases, most recent first
    async fn list_releases(
        &self,
        owner: &str,
        name: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> PullshipResult<Vec<Release>>;

    /// The host's latest final release
    async fn latest_release(
        &self,
        owner: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> PullshipResult<Release>;

    /// Request an asset, streaming its bytes into `dest` when served directly
    async fn download_asset(
        &self,
        owner: &str,
        name: &str,
        asset_id: u64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PullshipResult<AssetDownload>;

    /// Stream the bytes behind a redirect returned by `download_asset` into `dest`
    async fn fetch_redirect(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PullshipResult<u64>;

    /// Attach a new asset to an existing release
    #[allow(clippy::too_many_arguments)]
    async fn upload_asset(
        &self,
        owner: &str,
        name: &str,
        release_id: u64,
        filename: &str,
        data: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> PullshipResult<()>;

    /// Web host serving repository pages (e.g. `github.com`)
    fn web_host(&self) -> String;
}
