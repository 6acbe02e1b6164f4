use super::http::send_request;
use super::message::render;
use super::{parse_config, Channel, ChannelError};
use async_trait::async_trait;
use faultline_entities::types::NotificationType;
use faultline_entities::{issues, projects};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MattermostConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Mattermost incoming webhook. Markdown text, no attachments.
pub struct MattermostChannel {
    client: reqwest::Client,
}

impl MattermostChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Channel for MattermostChannel {
    fn channel_type(&self) -> NotificationType {
        NotificationType::Mattermost
    }

    async fn send(
        &self,
        issue: &issues::Model,
        project: &projects::Model,
        config: &Value,
        is_regression: bool,
    ) -> Result<(), ChannelError> {
        let config: MattermostConfig = parse_config(NotificationType::Mattermost, config)?;
        let message = render(issue, project, is_regression, config.base_url.as_deref());

        let mut payload = json!({ "text": message.markdown() });
        if let Some(channel) = &config.channel {
            payload["channel"] = json!(channel);
        }
        if let Some(username) = &config.username {
            payload["username"] = json!(username);
        }
        if let Some(icon_url) = &config.icon_url {
            payload["icon_url"] = json!(icon_url);
        }

        send_request(self.client.post(&config.webhook_url).json(&payload)).await?;
        debug!(issue_id = issue.id, "Mattermost notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::http::build_client;
    use crate::channels::test_support::{issue, project, CaptureServer};
    use axum::http::StatusCode;
    use std::time::Duration;

    #[tokio::test]
    async fn test_posts_markdown_text() {
        let server = CaptureServer::start(StatusCode::OK).await;
        let config = json!({
            "webhook_url": server.url("/hooks/abc"),
            "username": "faultline",
            "base_url": "https://errors.example.com"
        });
        let channel = MattermostChannel::new(build_client(Duration::from_secs(5)).unwrap());

        channel.send(&issue(), &project(), &config, true).await.unwrap();

        let body = server.requests()[0].json();
        let text = body["text"].as_str().unwrap();
        assert!(text.starts_with("**[Checkout] Regression: ValueError: bad input**"));
        assert!(text.contains("**Level:** exception"));
        assert!(text.contains("(https://errors.example.com/projects/checkout/issues/42)"));
        assert_eq!(body["username"], "faultline");
        assert!(body.get("channel").is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = CaptureServer::start(StatusCode::INTERNAL_SERVER_ERROR).await;
        let config = json!({ "webhook_url": server.url("/hooks/abc") });
        let channel = MattermostChannel::new(build_client(Duration::from_secs(5)).unwrap());

        let err = channel.send(&issue(), &project(), &config, false).await.unwrap_err();
        assert!(err.is_transient());
    }
}
