//! Durable artifact cache
//!
//! A key→bytes store plus one distinguished pointer entry (`current.txt`)
//! recording which cache key is presently deployed. Entries are written once
//! per artifact version and never evicted.
//!
//! # Layout
//!
//! | Entry | Contents |
//! |-------|----------|
//! | `<cache key>` | raw artifact bytes |
//! | `current.txt` | the active cache key as plain text |
//!
//! Large entries are streamed into a staging file and committed with a
//! rename, so a reader never sees a partial entry.

pub mod file;

pub use file::FileCache;

use crate::error::{PullshipError, PullshipResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Cache entry holding the currently deployed cache key
pub const CURRENT_KEY: &str = "current.txt";

/// Persistent key→bytes mapping shared by the resolver and the deployer
///
/// No locking beyond what the backing medium provides: a single daemon per
/// cache directory is assumed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the bytes stored under `key`, `CacheMiss` if absent
    async fn read(&self, key: &str) -> PullshipResult<Vec<u8>>;

    /// Store `data` under `key`
    async fn write(&self, key: &str, data: &[u8]) -> PullshipResult<()>;

    /// File a new entry for `key` is streamed into before `commit`
    fn staging_path(&self, key: &str) -> PullshipResult<PathBuf>;

    /// Publish the staged entry for `key`
    async fn commit(&self, key: &str) -> PullshipResult<()>;

    /// Drop the staged entry for `key`, if any
    async fn discard(&self, key: &str);

    /// All keys currently present
    async fn list(&self) -> PullshipResult<Vec<String>>;

    /// Directory holding one file per key
    fn base_dir(&self) -> &Path;

    /// Whether `key` is present
    async fn contains(&self, key: &str) -> PullshipResult<bool> {
        Ok(self.list().await?.iter().any(|k| k == key))
    }

    /// The current pointer, if one has been recorded
    async fn current(&self) -> PullshipResult<Option<String>> {
        match self.read(CURRENT_KEY).await {
            Ok(bytes) => {
                let key = String::from_utf8_lossy(&bytes).trim().to_string();
                Ok((!key.is_empty()).then_some(key))
            }
            Err(PullshipError::CacheMiss(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Repoint the current pointer at `key`
    async fn set_current(&self, key: &str) -> PullshipResult<()> {
        self.write(CURRENT_KEY, key.as_bytes()).await
    }
}
