//! Outbound notification channels.
//!
//! Every sink implements [`Channel`]; the dispatcher resolves one per
//! setting through the [`ChannelRegistry`], which is built once at startup
//! and never mutated afterwards.

mod email;
pub mod http;
mod mattermost;
pub mod message;
mod pachca;
mod slack;
mod telegram;
mod webhook;

pub use email::{EmailChannel, EmailConfig, TlsMode};
pub use mattermost::{MattermostChannel, MattermostConfig};
pub use message::{render, RenderedMessage};
pub use pachca::{PachcaChannel, PachcaConfig};
pub use slack::{SlackChannel, SlackConfig};
pub use telegram::{TelegramChannel, TelegramConfig};
pub use webhook::{WebhookChannel, WebhookConfig};

use async_trait::async_trait;
use faultline_entities::types::NotificationType;
use faultline_entities::{issues, projects};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Network trouble, timeouts, 5xx, rate limiting
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The sink rejected this payload
    #[error("delivery rejected: {0}")]
    Permanent(String),

    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),
}

impl ChannelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transient(_))
    }

    /// Whether this failure says something about the sink's health.
    /// A broken setting does not.
    pub fn counts_against_channel(&self) -> bool {
        !matches!(self, ChannelError::InvalidConfig(_))
    }
}

/// A notification sink
#[async_trait]
pub trait Channel: Send + Sync {
    fn channel_type(&self) -> NotificationType;

    /// Deliver a message about `issue` using the setting's JSON `config`
    async fn send(
        &self,
        issue: &issues::Model,
        project: &projects::Model,
        config: &Value,
        is_regression: bool,
    ) -> Result<(), ChannelError>;

    /// Rewrite `config` so a delivery reaches only `email`. `None` for
    /// channels that post to a shared destination.
    fn address_to(&self, _config: &Value, _email: &str) -> Option<Value> {
        None
    }
}

/// Deserialize a setting's JSON config into a channel's typed config
pub(crate) fn parse_config<T: DeserializeOwned>(
    channel: NotificationType,
    config: &Value,
) -> Result<T, ChannelError> {
    serde_json::from_value(config.clone())
        .map_err(|e| ChannelError::InvalidConfig(format!("{channel}: {e}")))
}

/// Channel type -> implementation
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<NotificationType, Arc<dyn Channel>>,
}

impl ChannelRegistry {
    pub fn new(channels: impl IntoIterator<Item = Arc<dyn Channel>>) -> Self {
        let mut map: HashMap<NotificationType, Arc<dyn Channel>> = HashMap::new();
        for channel in channels {
            let channel_type = channel.channel_type();
            if map.insert(channel_type, channel).is_some() {
                warn!(channel = %channel_type, "Duplicate channel registration, keeping the last one");
            }
        }
        Self { channels: map }
    }

    /// Registry with every built-in channel
    pub fn with_defaults() -> Result<Self, ChannelError> {
        let client = http::build_client(http::DEFAULT_TIMEOUT)?;
        Ok(Self::new([
            Arc::new(EmailChannel::new()) as Arc<dyn Channel>,
            Arc::new(TelegramChannel::new(client.clone())),
            Arc::new(SlackChannel::new(client.clone())),
            Arc::new(MattermostChannel::new(client.clone())),
            Arc::new(WebhookChannel::new(client.clone())),
            Arc::new(PachcaChannel::new(client)),
        ]))
    }

    pub fn get(&self, channel_type: NotificationType) -> Option<&Arc<dyn Channel>> {
        self.channels.get(&channel_type)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.channels.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("ChannelRegistry").field("channels", &types).finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use faultline_entities::types::{EventLevel, EventSource, IssueStatus};
    use faultline_entities::{issues, projects};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    pub struct CapturedRequest {
        pub path: String,
        pub headers: HeaderMap,
        pub body: Bytes,
    }

    impl CapturedRequest {
        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }

        pub fn header(&self, name: &str) -> Option<String> {
            self.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        }
    }

    #[derive(Clone)]
    struct CaptureState {
        status: StatusCode,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    /// Local HTTP server recording every POST it receives and answering
    /// with `status`
    pub struct CaptureServer {
        pub base_url: String,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl CaptureServer {
        pub async fn start(status: StatusCode) -> Self {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let state = CaptureState {
                status,
                requests: requests.clone(),
            };
            let app = Router::new()
                .route("/{*path}", post(capture))
                .with_state(state);

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base_url: format!("http://{}", addr),
                requests,
            }
        }

        pub fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }

        pub fn requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn capture(
        State(state): State<CaptureState>,
        uri: axum::http::Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        state.requests.lock().unwrap().push(CapturedRequest {
            path: uri.path().to_string(),
            headers,
            body,
        });
        state.status
    }

    pub fn issue() -> issues::Model {
        let seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        issues::Model {
            id: 42,
            project_id: 7,
            fingerprint: "3f786850e387550fdab836ed7e6dc881de23001b".to_string(),
            source: EventSource::Exception,
            status: IssueStatus::Unresolved,
            title: "ValueError: bad input".to_string(),
            level: EventLevel::Exception,
            platform: "python".to_string(),
            first_seen: seen,
            last_seen: seen,
            total_events: 3,
            last_notification: None,
            created_at: seen,
            updated_at: seen,
        }
    }

    pub fn project() -> projects::Model {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        projects::Model {
            id: 7,
            name: "Checkout".to_string(),
            slug: "checkout".to_string(),
            team_id: None,
            created_at: created,
            updated_at: created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    struct NamedChannel(NotificationType);

    #[async_trait]
    impl Channel for NamedChannel {
        fn channel_type(&self) -> NotificationType {
            self.0
        }

        async fn send(
            &self,
            _issue: &issues::Model,
            _project: &projects::Model,
            _config: &Value,
            _is_regression: bool,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ChannelRegistry::new([
            Arc::new(NamedChannel(NotificationType::Slack)) as Arc<dyn Channel>,
            Arc::new(NamedChannel(NotificationType::Webhook)),
        ]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(NotificationType::Slack).is_some());
        assert!(registry.get(NotificationType::Email).is_none());
    }

    #[test]
    fn test_default_registry_covers_every_type() {
        let registry = ChannelRegistry::with_defaults().unwrap();
        for channel_type in NotificationType::iter() {
            let channel = registry.get(channel_type).unwrap();
            assert_eq!(channel.channel_type(), channel_type);
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(ChannelError::Transient("503".into()).is_transient());
        assert!(!ChannelError::Permanent("400".into()).is_transient());
        assert!(ChannelError::Permanent("400".into()).counts_against_channel());
        assert!(!ChannelError::InvalidConfig("missing url".into()).counts_against_channel());
    }

    #[test]
    fn test_parse_config_reports_channel() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Needs {
            url: String,
        }
        let err = parse_config::<Needs>(NotificationType::Webhook, &serde_json::json!({}))
            .unwrap_err();
        match err {
            ChannelError::InvalidConfig(message) => assert!(message.starts_with("webhook:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
