use super::http::send_request;
use super::message::render;
use super::{parse_config, Channel, ChannelError};
use async_trait::async_trait;
use faultline_entities::types::NotificationType;
use faultline_entities::{issues, projects};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const PACHCA_API: &str = "https://api.pachca.com/api/shared/v1";

fn default_api_base_url() -> String {
    PACHCA_API.to_string()
}

fn default_entity_type() -> String {
    "discussion".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PachcaConfig {
    pub access_token: String,
    /// Chat, thread or user id messages are posted to
    pub entity_id: i64,
    /// `discussion`, `thread` or `user`
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Pachca messenger, `POST /messages` with a bearer token
pub struct PachcaChannel {
    client: reqwest::Client,
}

impl PachcaChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Channel for PachcaChannel {
    fn channel_type(&self) -> NotificationType {
        NotificationType::Pachca
    }

    async fn send(
        &self,
        issue: &issues::Model,
        project: &projects::Model,
        config: &Value,
        is_regression: bool,
    ) -> Result<(), ChannelError> {
        let config: PachcaConfig = parse_config(NotificationType::Pachca, config)?;
        if !matches!(config.entity_type.as_str(), "discussion" | "thread" | "user") {
            return Err(ChannelError::InvalidConfig(format!(
                "pachca: unknown entity_type '{}'",
                config.entity_type
            )));
        }
        let message = render(issue, project, is_regression, config.base_url.as_deref());

        let payload = json!({
            "message": {
                "entity_type": config.entity_type,
                "entity_id": config.entity_id,
                "content": message.markdown()
            }
        });
        let url = format!("{}/messages", config.api_base_url.trim_end_matches('/'));

        send_request(
            self.client
                .post(url)
                .bearer_auth(&config.access_token)
                .json(&payload),
        )
        .await?;
        debug!(issue_id = issue.id, entity_id = config.entity_id, "Pachca notification delivered");
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

    fn channel() -> PachcaChannel {
        PachcaChannel::new(build_client(Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_posts_message_with_bearer_token() {
        let server = CaptureServer::start(StatusCode::OK).await;
        let config = json!({
            "access_token": "secret-token",
            "entity_id": 198,
            "api_base_url": format!("{}/api/shared/v1", server.base_url)
        });

        channel().send(&issue(), &project(), &config, true).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests[0].path, "/api/shared/v1/messages");
        assert_eq!(
            requests[0].header("authorization").as_deref(),
            Some("Bearer secret-token")
        );
        let body = requests[0].json();
        assert_eq!(body["message"]["entity_type"], "discussion");
        assert_eq!(body["message"]["entity_id"], 198);
        assert!(body["message"]["content"]
            .as_str()
            .unwrap()
            .contains("Regression"));
    }

    #[tokio::test]
    async fn test_unknown_entity_type() {
        let config = json!({"access_token": "t", "entity_id": 1, "entity_type": "channel"});
        let err = channel().send(&issue(), &project(), &config, false).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = CaptureServer::start(StatusCode::TOO_MANY_REQUESTS).await;
        let config = json!({
            "access_token": "t",
            "entity_id": 1,
            "api_base_url": server.base_url
        });
        let err = channel().send(&issue(), &project(), &config, false).await.unwrap_err();
        assert!(err.is_transient());
    }
}
