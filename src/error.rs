//! Error types for Pullship
//!
//! All modules use `PullshipResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Pullship operations
pub type PullshipResult<T> = Result<T, PullshipError>;

/// All errors that can occur in Pullship
#[derive(Error, Debug)]
pub enum PullshipError {
    // Release host errors
    #[error("Release host request failed: {context}: {reason}")]
    RemoteApi { context: String, reason: String },

    #[error("No eligible release found for {repository}")]
    NoEligibleRelease { repository: String },

    #[error("Artifact {artifact} not found in release {tag}")]
    ArtifactNotFound { artifact: String, tag: String },

    #[error("Unsupported release provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid download URL {url}: {reason}")]
    InvalidDownloadUrl { url: String, reason: String },

    // Cycle outcomes
    #[error("No need to deploy: {key} is already current")]
    NothingToDeploy { key: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // Cache errors
    #[error("Cache {operation} failed for {key}: {source}")]
    CacheIo {
        operation: &'static str,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry not found: {0}")]
    CacheMiss(String),

    // Deploy errors
    #[error("Failed to create deployment slot {path}: {source}")]
    SlotCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract {archive} into {dest}: {reason}")]
    ArchiveExtraction {
        archive: PathBuf,
        dest: PathBuf,
        reason: String,
    },

    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(PathBuf),

    #[error("Failed to point {link} at {target}: {source}")]
    LinkSwap {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Server lifecycle errors
    #[error("Server lifecycle error: {0}")]
    ServerLifecycle(String),

    #[error("Failed to record shipping: {0}")]
    ShippingRecord(String),

    // Notification errors
    #[error("Notification failed: {0}")]
    Notify(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing required setting: {0}")]
    ConfigMissing(&'static str),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PullshipError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a cache IO error for a store operation on `key`
    pub fn cache_io(operation: &'static str, key: impl Into<String>, source: std::io::Error) -> Self {
        Self::CacheIo {
            operation,
            key: key.into(),
            source,
        }
    }

    /// Create a release host error
    pub fn remote(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::RemoteApi {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends a cycle without anything being wrong.
    ///
    /// The poll loop logs these at debug level and waits for the next tick.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NothingToDeploy { .. } | Self::Cancelled(_))
    }

    /// Whether the Active-Version Link is guaranteed untouched after this error
    pub fn leaves_link_untouched(&self) -> bool {
        matches!(
            self,
            Self::SlotCreation { .. }
                | Self::ArchiveExtraction { .. }
                | Self::UnsupportedArchive(_)
                | Self::CacheMiss(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoEligibleRelease { .. } => Some(
                "Publish a non-draft release, or set repository.prerelease_fallback = \"latest\"",
            ),
            Self::ArtifactNotFound { .. } => {
                Some("Check that repository.artifact matches an asset name exactly")
            }
            Self::UnsupportedProvider(_) => Some("Supported providers: github"),
            Self::UnsupportedArchive(_) => Some("Supported archives: .tar.gz, .tgz, .tar, .zip"),
            Self::ConfigMissing(_) => Some("Run: pullship config init, then edit the file"),
            Self::ServerLifecycle(_) => {
                Some("The new release is linked; restart the server manually")
            }
            _ => None,
        }
    }
}
