use super::http::send_request;
use super::message::render;
use super::{parse_config, Channel, ChannelError};
use async_trait::async_trait;
use faultline_entities::types::NotificationType;
use faultline_entities::{issues, projects};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Numeric chat id or `@channelusername`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatId {
    Id(i64),
    Username(String),
}

fn default_api_base_url() -> String {
    TELEGRAM_API.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: ChatId,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl TelegramConfig {
    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base_url.trim_end_matches('/'),
            self.bot_token
        )
    }
}

/// Telegram Bot API `sendMessage`
pub struct TelegramChannel {
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn channel_type(&self) -> NotificationType {
        NotificationType::Telegram
    }

    async fn send(
        &self,
        issue: &issues::Model,
        project: &projects::Model,
        config: &Value,
        is_regression: bool,
    ) -> Result<(), ChannelError> {
        let config: TelegramConfig = parse_config(NotificationType::Telegram, config)?;
        if config.bot_token.trim().is_empty() {
            return Err(ChannelError::InvalidConfig(
                "telegram: bot_token is empty".to_string(),
            ));
        }
        let message = render(issue, project, is_regression, config.base_url.as_deref());

        let payload = json!({
            "chat_id": config.chat_id,
            "text": message.text(),
            "disable_web_page_preview": true
        });

        send_request(self.client.post(config.send_message_url()).json(&payload)).await?;
        debug!(issue_id = issue.id, "Telegram notification delivered");
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

    fn channel() -> TelegramChannel {
        TelegramChannel::new(build_client(Duration::from_secs(5)).unwrap())
    }

    #[test]
    fn test_default_api_base() {
        let config: TelegramConfig =
            serde_json::from_value(json!({"bot_token": "123:abc", "chat_id": -100200})).unwrap();
        assert_eq!(
            config.send_message_url(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert_eq!(config.chat_id, ChatId::Id(-100200));
    }

    #[tokio::test]
    async fn test_sends_message_to_chat() {
        let server = CaptureServer::start(StatusCode::OK).await;
        let config = json!({
            "bot_token": "123:abc",
            "chat_id": "@ops",
            "api_base_url": server.base_url
        });

        channel().send(&issue(), &project(), &config, false).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests[0].path, "/bot123:abc/sendMessage");
        let body = requests[0].json();
        assert_eq!(body["chat_id"], "@ops");
        assert!(body["text"]
            .as_str()
            .unwrap()
            .starts_with("[Checkout] New error: ValueError: bad input"));
    }

    #[tokio::test]
    async fn test_unauthorized_bot_is_permanent() {
        let server = CaptureServer::start(StatusCode::UNAUTHORIZED).await;
        let config = json!({
            "bot_token": "bad",
            "chat_id": 1,
            "api_base_url": server.base_url
        });
        let err = channel().send(&issue(), &project(), &config, false).await.unwrap_err();
        assert!(matches!(err, ChannelError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_empty_token_rejected_without_request() {
        let err = channel()
            .send(&issue(), &project(), &json!({"bot_token": " ", "chat_id": 1}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(_)));
    }
}
