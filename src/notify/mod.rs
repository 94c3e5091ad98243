//! Deployment notifications
//!
//! Notifications are best effort: callers log failures and carry on.

mod slack;

pub use slack::SlackNotifier;

use crate::config::schema::NotifyConfig;
use crate::error::PullshipResult;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Structured field attached to a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    /// Rendered side by side with other short fields
    pub short: bool,
}

impl Field {
    pub fn new(title: impl Into<String>, value: impl Into<String>, short: bool) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
            short,
        }
    }
}

/// Sink for deployment notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        message: &str,
        fields: &[Field],
        cancel: &CancellationToken,
    ) -> PullshipResult<()>;
}

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        message: &str,
        fields: &[Field],
        _cancel: &CancellationToken,
    ) -> PullshipResult<()> {
        if fields.is_empty() {
            info!("{}", message);
        } else {
            let rendered = fields
                .iter()
                .map(|f| format!("{}={}", f.title, f.value))
                .collect::<Vec<_>>()
                .join(", ");
            info!(fields = %rendered, "{}", message);
        }
        Ok(())
    }
}

/// Where Slack notifications link to and who they come from
#[derive(Debug, Clone)]
pub struct NoticeSource {
    /// Repository slug, e.g. `owner/name`
    pub name: String,
    /// Repository page URL
    pub link: String,
    /// Owner avatar URL
    pub icon_url: String,
    /// Local hostname
    pub host: String,
}

/// Slack token and channel, when Slack is enabled and both are set
fn slack_credentials(config: &NotifyConfig) -> Option<(String, String)> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    if !config.slack {
        return None;
    }
    Some((env("SLACK_TOKEN")?, env("SLACK_CHANNEL")?))
}

/// Pick the notifier for `config`
///
/// Slack is used when enabled and both `SLACK_TOKEN` and `SLACK_CHANNEL`
/// are set; otherwise notifications go to the log.
pub fn from_config(
    config: &NotifyConfig,
    source: NoticeSource,
    timeout: Duration,
) -> Arc<dyn Notifier> {
    match slack_credentials(config) {
        Some((token, channel)) => {
            info!("Notifying Slack channel {}", channel);
            Arc::new(SlackNotifier::new(token, channel, source, timeout))
        }
        None => Arc::new(LogNotifier),
    }
}
