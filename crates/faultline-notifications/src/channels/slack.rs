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
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Slack incoming webhook
pub struct SlackChannel {
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn payload(
        config: &SlackConfig,
        issue: &issues::Model,
        project: &projects::Model,
        is_regression: bool,
    ) -> Value {
        let message = render(issue, project, is_regression, config.base_url.as_deref());
        let fields = message
            .fields
            .iter()
            .map(|(name, value)| {
                json!({
                    "title": name,
                    "value": value,
                    "short": *name != "Fingerprint"
                })
            })
            .collect::<Vec<_>>();

        let mut payload = json!({
            "text": message.title,
            "attachments": [{
                "color": message.color,
                "title": message.title,
                "title_link": message.link,
                "fields": fields,
                "footer": format!("Faultline | {}", project.slug)
            }]
        });
        if let Some(channel) = &config.channel {
            payload["channel"] = json!(channel);
        }
        if let Some(username) = &config.username {
            payload["username"] = json!(username);
        }
        payload
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn channel_type(&self) -> NotificationType {
        NotificationType::Slack
    }

    async fn send(
        &self,
        issue: &issues::Model,
        project: &projects::Model,
        config: &Value,
        is_regression: bool,
    ) -> Result<(), ChannelError> {
        let config: SlackConfig = parse_config(NotificationType::Slack, config)?;
        let payload = Self::payload(&config, issue, project, is_regression);

        send_request(self.client.post(&config.webhook_url).json(&payload)).await?;
        debug!(issue_id = issue.id, "Slack notification delivered");
        Ok(())
    }
}
