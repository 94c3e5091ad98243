//! Slack `chat.postMessage` notifier

use super::{Field, NoticeSource, Notifier};
use crate::error::{PullshipError, PullshipResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ureq::Agent;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const COLOR: &str = "#2eb886";

/// Posts notifications to a Slack channel with a bot token
pub struct SlackNotifier {
    agent: Agent,
    endpoint: String,
    token: String,
    channel: String,
    source: NoticeSource,
}

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(token: String, channel: String, source: NoticeSource, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            endpoint: POST_MESSAGE_URL.to_string(),
            token,
            channel,
            source,
        }
    }

    /// `chat.postMessage` body for `message`
    fn payload(&self, message: &str, fields: &[Field]) -> Value {
        json!({
            "channel": self.channel,
            "username": "pullship",
            "icon_url": self.source.icon_url,
            "attachments": [{
                "color": COLOR,
                "title": self.source.name,
                "title_link": self.source.link,
                "text": message,
                "fields": fields,
                "footer": self.source.host,
                "mrkdwn_in": ["text"],
            }],
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(
        &self,
        message: &str,
        fields: &[Field],
        cancel: &CancellationToken,
    ) -> PullshipResult<()> {
        let body = serde_json::to_vec(&self.payload(message, fields))?;
        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();
        let auth = format!("Bearer {}", self.token);

        let task = tokio::task::spawn_blocking(move || -> PullshipResult<()> {
            debug!("POST {}", endpoint);
            let mut resp = agent
                .post(&endpoint)
                .header("Authorization", &auth)
                .header("Content-Type", "application/json; charset=utf-8")
                .send(&body[..])
                .map_err(|e| PullshipError::Notify(e.to_string()))?;

            let status = resp.status();
            let text = resp
                .body_mut()
                .read_to_string()
                .map_err(|e| PullshipError::Notify(e.to_string()))?;
            if !status.is_success() {
                return Err(PullshipError::Notify(format!("HTTP {}", status.as_u16())));
            }

            // Slack reports API errors in a 200 body
            let parsed: SlackResponse = serde_json::from_str(&text)?;
            if parsed.ok {
                Ok(())
            } else {
                Err(PullshipError::Notify(
                    parsed.error.unwrap_or_else(|| "unknown error".to_string()),
                ))
            }
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PullshipError::Cancelled("slack notification".to_string())),
            joined = task => joined
                .map_err(|e| PullshipError::Internal(format!("slack notification panicked: {}", e)))?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> SlackNotifier {
        SlackNotifier::new(
            "xoxb-test".to_string(),
            "#deploys".to_string(),
            NoticeSource {
                name: "acme/app".to_string(),
                link: "https://github.com/acme/app".to_string(),
                icon_url: "https://github.com/acme.png?size=200".to_string(),
                host: "web-1".to_string(),
            },
            Duration::from_secs(1),
        )
    }

    #[test]
    fn payload_carries_repository_header_and_fields() {
        let fields = [
            Field::new("Command", "server", true),
            Field::new("Working directory", "/srv/app", false),
        ];

        let payload = notifier().payload("Server starting", &fields);

        assert_eq!(payload["channel"], "#deploys");
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["title"], "acme/app");
        assert_eq!(attachment["title_link"], "https://github.com/acme/app");
        assert_eq!(attachment["text"], "Server starting");
        assert_eq!(attachment["footer"], "web-1");
        assert_eq!(attachment["fields"][1]["title"], "Working directory");
        assert_eq!(attachment["fields"][1]["short"], false);
    }

    #[test]
    fn api_error_body_parses() {
        let parsed: SlackResponse =
            serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.error.as_deref(), Some("channel_not_found"));
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = notifier().notify("hello", &[], &cancel).await.unwrap_err();
        assert!(matches!(err, PullshipError::Cancelled(_)));
    }
}
