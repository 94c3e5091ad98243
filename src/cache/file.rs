//! Filesystem-backed cache store

use crate::cache::CacheStore;
use crate::error::{PullshipError, PullshipResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Cache store keeping one file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (and create if needed) a cache rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> PullshipResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PullshipError::io(format!("creating cache dir {}", dir.display()), e))?;

        debug!("Using artifact cache at {}", dir.display());
        Ok(Self { dir })
    }

    /// Path of the file backing `key`
    pub fn entry_path(&self, key: &str) -> PullshipResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

/// Keys become file names, so they must not contain separators or traverse upward
fn validate_key(key: &str) -> PullshipResult<()> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']) {
        return Err(PullshipError::cache_io(
            "validate",
            key,
            std::io::Error::new(ErrorKind::InvalidInput, "key is not a plain file name"),
        ));
    }
    Ok(())
}

#[async_trait]
impl CacheStore for FileCache {
    async fn read(&self, key: &str) -> PullshipResult<Vec<u8>> {
        let path = self.entry_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PullshipError::CacheMiss(key.to_string()))
            }
            Err(e) => Err(PullshipError::cache_io("read", key, e)),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> PullshipResult<()> {
        let tmp = self.staging_path(key)?;
        fs::write(&tmp, data)
            .await
            .map_err(|e| PullshipError::cache_io("write", key, e))?;
        self.commit(key).await?;

        debug!("Cached {} bytes as {}", data.len(), key);
        Ok(())
    }

    fn staging_path(&self, key: &str) -> PullshipResult<PathBuf> {
        validate_key(key)?;
        // Dot-prefixed so `list` never reports it
        Ok(self.dir.join(format!(".{}.partial", key)))
    }

    async fn commit(&self, key: &str) -> PullshipResult<()> {
        let tmp = self.staging_path(key)?;
        fs::rename(&tmp, self.entry_path(key)?)
            .await
            .map_err(|e| PullshipError::cache_io("commit", key, e))
    }

    async fn discard(&self, key: &str) {
        let Ok(tmp) = self.staging_path(key) else {
            return;
        };
        match fs::remove_file(&tmp).await {
            Ok(()) => debug!("Discarded partial entry {}", key),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", tmp.display(), e),
        }
    }

    async fn list(&self) -> PullshipResult<Vec<String>> {
        let mut keys = vec![];
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| PullshipError::cache_io("list", self.dir.display().to_string(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PullshipError::cache_io("list", self.dir.display().to_string(), e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_file && !name.starts_with('.') {
                keys.push(name);
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn base_dir(&self) -> &Path {
        &self.dir
    }
}
