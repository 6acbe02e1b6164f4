use super::http::send_request;
use super::message::render;
use super::{parse_config, Channel, ChannelError};
use async_trait::async_trait;
use chrono::Utc;
use faultline_entities::types::NotificationType;
use faultline_entities::{issues, projects};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Extra headers sent with every delivery
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Signs deliveries with `X-Webhook-Signature` when set
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Generic JSON webhook
pub struct WebhookChannel {
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn event_name(is_regression: bool) -> &'static str {
        if is_regression {
            "issue.regression"
        } else {
            "issue.new"
        }
    }

    fn payload(
        config: &WebhookConfig,
        issue: &issues::Model,
        project: &projects::Model,
        is_regression: bool,
    ) -> Value {
        let message = render(issue, project, is_regression, config.base_url.as_deref());
        json!({
            "event": Self::event_name(is_regression),
            "is_regression": is_regression,
            "project": {
                "id": project.id,
                "name": project.name,
                "slug": project.slug
            },
            "issue": {
                "id": issue.id,
                "title": issue.title,
                "fingerprint": issue.fingerprint,
                "status": issue.status.as_str(),
                "level": issue.level.as_str(),
                "platform": issue.platform,
                "first_seen": issue.first_seen.to_rfc3339(),
                "last_seen": issue.last_seen.to_rfc3339(),
                "total_events": issue.total_events
            },
            "message": {
                "title": message.title,
                "text": message.body,
                "link": message.link
            }
        })
    }
}

/// `sha256=<hex>` HMAC over `"{timestamp}.{payload}"`
pub fn sign_payload(secret: &str, timestamp: &str, payload: &str) -> Result<String, ChannelError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ChannelError::InvalidConfig(format!("webhook: bad secret: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl Channel for WebhookChannel {
    fn channel_type(&self) -> NotificationType {
        NotificationType::Webhook
    }

    async fn send(
        &self,
        issue: &issues::Model,
        project: &projects::Model,
        config: &Value,
        is_regression: bool,
    ) -> Result<(), ChannelError> {
        let config: WebhookConfig = parse_config(NotificationType::Webhook, config)?;
        let payload = Self::payload(&config, issue, project, is_regression).to_string();
        let timestamp = Utc::now().timestamp().to_string();

        let mut request = self
            .client
            .post(&config.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", Self::event_name(is_regression))
            .header("X-Webhook-Timestamp", &timestamp);
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(secret) = config.secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(
                "X-Webhook-Signature",
                sign_payload(secret, &timestamp, &payload)?,
            );
        }

        send_request(request.body(payload)).await?;
        debug!(issue_id = issue.id, url = %config.url, "Webhook notification delivered");
        Ok(())
    }
}
