//! Configuration schema for Pullship
//!
//! Configuration is stored at `~/.config/pullship/config.toml`

use crate::error::{PullshipError, PullshipResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Release repository to poll
    pub repository: RepositoryConfig,

    /// Poll schedule
    pub schedule: ScheduleConfig,

    /// Local deployment layout
    pub deploy: DeployConfig,

    /// Remote call settings
    pub http: HttpConfig,

    /// Managed server settings
    pub server: ServerConfig,

    /// Notification settings
    pub notify: NotifyConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Known release host providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// GitHub (or GitHub Enterprise) releases
    #[default]
    Github,
}

impl FromStr for Provider {
    type Err = PullshipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" | "ghr" => Ok(Self::Github),
            other => Err(PullshipError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Github => write!(f, "github"),
        }
    }
}

/// What to do when pre-release mode finds no candidate on the first page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrereleaseFallback {
    /// Fail the cycle with `NoEligibleRelease`
    #[default]
    Error,
    /// Fall back to the host's latest (final) release
    Latest,
}

/// Release repository settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Release host provider
    pub provider: Provider,

    /// Repository owner
    pub owner: String,

    /// Repository name
    pub name: String,

    /// Exact asset filename to deploy
    pub artifact: String,

    /// Consider pre-releases as candidates
    pub prerelease: bool,

    /// Policy when pre-release mode finds only drafts
    pub prerelease_fallback: PrereleaseFallback,

    /// Skip uploading the shipping record after a deploy
    pub disable_record_shipping: bool,

    /// API base URL override (GitHub Enterprise)
    pub api_url: Option<String>,

    /// Upload base URL override (GitHub Enterprise)
    pub upload_url: Option<String>,
}

impl RepositoryConfig {
    /// `owner/name` form used in logs and notifications
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Parse an `owner/name` string into this config
    pub fn set_slug(&mut self, slug: &str) -> PullshipResult<()> {
        match slug.trim_matches('/').split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                self.owner = owner.to_string();
                self.name = name.to_string();
                Ok(())
            }
            _ => Err(PullshipError::ConfigInvalid {
                path: PathBuf::from("--repository"),
                reason: format!("expected owner/name, got {:?}", slug),
            }),
        }
    }

    /// Ensure the fields needed to resolve a release are present
    pub fn validate(&self) -> PullshipResult<()> {
        if self.owner.is_empty() {
            return Err(PullshipError::ConfigMissing("repository.owner"));
        }
        if self.name.is_empty() {
            return Err(PullshipError::ConfigMissing("repository.name"));
        }
        if self.artifact.is_empty() {
            return Err(PullshipError::ConfigMissing("repository.artifact"));
        }
        Ok(())
    }
}

/// Poll schedule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between poll cycles
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

/// Local deployment layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Root holding `releases/` and `current` (default: working directory)
    pub root: Option<PathBuf>,

    /// Artifact cache directory (default: user cache dir)
    pub cache_dir: Option<PathBuf>,
}

/// Remote call settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout for a single remote call in seconds
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Managed server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Program and arguments to run from the `current` directory
    pub command: Vec<String>,

    /// Extra environment variables for the server
    pub env: HashMap<String, String>,

    /// Signal requesting a graceful restart (HUP, USR1, USR2, TERM)
    pub restart_signal: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: vec![],
            env: HashMap::new(),
            restart_signal: "HUP".to_string(),
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Post to Slack when SLACK_TOKEN and SLACK_CHANNEL are set
    pub slack: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { slack: true }
    }
}
