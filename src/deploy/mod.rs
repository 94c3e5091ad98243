//! Deploy pipeline
//!
//! Extracts a cached artifact into a fresh timestamp-named slot under
//! `<root>/releases/` and repoints `<root>/current` at it.
//!
//! # Layout
//!
//! ```text
//! <root>/releases/20230101T000000Z/...   extracted artifact
//! <root>/releases/20230102T093000Z/...
//! <root>/current -> <root>/releases/20230102T093000Z
//! ```
//!
//! The link is only replaced once the new slot is fully populated, so a
//! failed extraction leaves `current` on the previous slot. Removing the old
//! link and creating the new one are two steps; a crash in between leaves no
//! `current` link until the next successful deploy.

pub mod archive;

pub use archive::ArchiveFormat;

use crate::cache::CacheStore;
use crate::error::{PullshipError, PullshipResult};
use crate::release::CacheKey;
use crate::stamp;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Directory holding deployment slots
pub const RELEASES_DIR: &str = "releases";

/// Link pointing at the active slot
pub const CURRENT_LINK: &str = "current";

/// Same-second slots get a numeric suffix up to this bound
const MAX_SLOT_SUFFIX: u32 = 100;

/// Extracts cached artifacts into slots and switches the active version
pub struct Deployer {
    root: PathBuf,
    cache: Arc<dyn CacheStore>,
}

impl Deployer {
    pub fn new(root: impl Into<PathBuf>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            root: root.into(),
            cache,
        }
    }

    /// Deployment root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the active-version link
    pub fn current_link(&self) -> PathBuf {
        self.root.join(CURRENT_LINK)
    }

    /// Directory holding all slots
    pub fn releases_dir(&self) -> PathBuf {
        self.root.join(RELEASES_DIR)
    }

    /// Slot the active-version link points at, if any
    pub async fn current_slot(&self) -> Option<PathBuf> {
        fs::read_link(self.current_link()).await.ok()
    }

    /// Deploy the cache entry `key` and return the new slot
    pub async fn deploy(&self, key: &CacheKey) -> PullshipResult<PathBuf> {
        let archive = self.cache.base_dir().join(key.as_str());
        if !fs::try_exists(&archive).await.unwrap_or(false) {
            return Err(PullshipError::CacheMiss(key.to_string()));
        }

        let slot = self.create_slot(Utc::now()).await?;

        if let Err(e) = archive::extract(&archive, &slot).await {
            // The slot was never linked; drop the partial contents
            if let Err(cleanup) = fs::remove_dir_all(&slot).await {
                warn!("Failed to remove partial slot {}: {}", slot.display(), cleanup);
            }
            return Err(e);
        }
        info!("Extracted archive to {}", slot.display());

        self.swap_link(&slot).await?;
        Ok(slot)
    }

    /// Create an empty slot named after `now`, disambiguating same-second collisions
    async fn create_slot(&self, now: DateTime<Utc>) -> PullshipResult<PathBuf> {
        let releases = self.releases_dir();
        fs::create_dir_all(&releases)
            .await
            .map_err(|e| PullshipError::SlotCreation {
                path: releases.clone(),
                source: e,
            })?;

        let base = stamp::compact_utc(now);
        let mut candidate = releases.join(&base);
        let mut suffix = 0;

        loop {
            match fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && suffix < MAX_SLOT_SUFFIX => {
                    suffix += 1;
                    candidate = releases.join(format!("{}-{}", base, suffix));
                }
                Err(e) => {
                    return Err(PullshipError::SlotCreation {
                        path: candidate,
                        source: e,
                    })
                }
            }
        }
    }

    /// Point the active-version link at `slot`
    async fn swap_link(&self, slot: &Path) -> PullshipResult<()> {
        let link = self.current_link();
        let swap_failed = |e: std::io::Error| PullshipError::LinkSwap {
            link: link.clone(),
            target: slot.to_path_buf(),
            source: e,
        };

        match fs::remove_file(&link).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(swap_failed(e)),
        }

        // Relative targets resolve against the link's directory, not ours
        let target = std::path::absolute(slot).map_err(swap_failed)?;
        info!("Create symlink to {} from {}", link.display(), target.display());
        symlink_dir(&target, &link).await.map_err(swap_failed)
    }
}

#[cfg(unix)]
async fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink_dir(target, link).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::deploy::archive::tests::{tar_gz, zip_bytes};
    use chrono::TimeZone;
    use serial_test::serial;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<FileCache>, Deployer) {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(FileCache::open(dir.path().join("cache")).await.unwrap());
        let deployer = Deployer::new(dir.path().join("app"), cache.clone());
        (dir, cache, deployer)
    }

    #[tokio::test]
    async fn deploy_links_extracted_slot() {
        let (_dir, cache, deployer) = setup().await;
        let key = CacheKey::from_stored("github.com--1-app.tar.gz");
        cache
            .write(key.as_str(), &tar_gz(&[("app", b"v1 binary")]))
            .await
            .unwrap();

        let slot = deployer.deploy(&key).await.unwrap();

        assert!(slot.starts_with(deployer.releases_dir()));
        assert_eq!(deployer.current_slot().await.unwrap(), slot);
        assert_eq!(
            std::fs::read(deployer.current_link().join("app")).unwrap(),
            b"v1 binary"
        );
    }

    #[tokio::test]
    async fn redeploy_repoints_link() {
        let (_dir, cache, deployer) = setup().await;
        let v1 = CacheKey::from_stored("github.com--1-app.zip");
        let v2 = CacheKey::from_stored("github.com--2-app.zip");
        cache.write(v1.as_str(), &zip_bytes(&[("app", b"one")])).await.unwrap();
        cache.write(v2.as_str(), &zip_bytes(&[("app", b"two")])).await.unwrap();

        let first = deployer.deploy(&v1).await.unwrap();
        let second = deployer.deploy(&v2).await.unwrap();

        assert_ne!(first, second);
        assert!(first.is_dir(), "old slots are kept");
        assert_eq!(deployer.current_slot().await.unwrap(), second);
        assert_eq!(std::fs::read(deployer.current_link().join("app")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn failed_extraction_keeps_previous_link() {
        let (_dir, cache, deployer) = setup().await;
        let good = CacheKey::from_stored("github.com--1-app.tar.gz");
        let bad = CacheKey::from_stored("github.com--2-app.tar.gz");
        cache.write(good.as_str(), &tar_gz(&[("app", b"ok")])).await.unwrap();
        cache.write(bad.as_str(), b"\x1f\x8bgarbage").await.unwrap();

        let previous = deployer.deploy(&good).await.unwrap();
        let err = deployer.deploy(&bad).await.unwrap_err();

        assert!(matches!(err, PullshipError::ArchiveExtraction { .. }));
        assert!(err.leaves_link_untouched());
        assert_eq!(deployer.current_slot().await.unwrap(), previous);
        let slots = std::fs::read_dir(deployer.releases_dir()).unwrap().count();
        assert_eq!(slots, 1, "partial slot is removed");
    }

    #[tokio::test]
    #[serial]
    async fn relative_root_links_absolute_slot() {
        let dir = TempDir::new().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let cache = Arc::new(FileCache::open(dir.path().join("cache")).await.unwrap());
        let key = CacheKey::from_stored("github.com--1-app.tar.gz");
        cache.write(key.as_str(), &tar_gz(&[("app", b"v1")])).await.unwrap();
        let deployer = Deployer::new("app", cache);
        let deployed = deployer.deploy(&key).await;

        std::env::set_current_dir(original).unwrap();
        let slot = deployed.unwrap();

        let link = dir.path().join("app").join(CURRENT_LINK);
        let target = std::fs::read_link(&link).unwrap();
        assert!(target.is_absolute());
        assert!(target.ends_with(slot));
        assert_eq!(std::fs::read(link.join("app")).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn missing_cache_entry_creates_nothing() {
        let (_dir, _cache, deployer) = setup().await;

        let err = deployer
            .deploy(&CacheKey::from_stored("absent.zip"))
            .await
            .unwrap_err();

        assert!(matches!(err, PullshipError::CacheMiss(_)));
        assert!(!deployer.releases_dir().exists());
        assert!(deployer.current_slot().await.is_none());
    }

    #[tokio::test]
    async fn same_second_slots_are_disambiguated() {
        let (_dir, _cache, deployer) = setup().await;
        let now = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        let a = deployer.create_slot(now).await.unwrap();
        let b = deployer.create_slot(now).await.unwrap();

        assert!(a.ends_with("20230101T000000Z"));
        assert!(b.ends_with("20230101T000000Z-1"));
    }

    #[tokio::test]
    async fn slot_creation_failure_is_typed() {
        let (dir, _cache, _deployer) = setup().await;
        // A file where the root directory should be
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let cache: Arc<dyn CacheStore> = Arc::new(FileCache::open(dir.path().join("c2")).await.unwrap());
        let deployer = Deployer::new(&blocked, cache);

        let err = deployer.create_slot(Utc::now()).await.unwrap_err();
        assert!(matches!(err, PullshipError::SlotCreation { .. }));
    }
}
