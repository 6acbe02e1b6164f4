use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Severity of an ingested event.
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    #[sea_orm(string_value = "fatal")]
    Fatal,
    #[sea_orm(string_value = "exception")]
    Exception,
    #[sea_orm(string_value = "error")]
    Error,
    #[sea_orm(string_value = "warning")]
    Warning,
    #[sea_orm(string_value = "info")]
    Info,
    #[sea_orm(string_value = "debug")]
    Debug,
}

impl Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Fatal => "fatal",
            EventLevel::Exception => "exception",
            EventLevel::Error => "error",
            EventLevel::Warning => "warning",
            EventLevel::Info => "info",
            EventLevel::Debug => "debug",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fatal" => Some(EventLevel::Fatal),
            "exception" => Some(EventLevel::Exception),
            "error" => Some(EventLevel::Error),
            "warning" => Some(EventLevel::Warning),
            "info" => Some(EventLevel::Info),
            "debug" => Some(EventLevel::Debug),
            _ => None,
        }
    }
}

/// Whether an event was reported as a plain message or as an exception
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    #[sea_orm(string_value = "event")]
    Event,
    #[sea_orm(string_value = "exception")]
    Exception,
}

impl Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Event => "event",
            EventSource::Exception => "exception",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "event" => Some(EventSource::Event),
            "exception" => Some(EventSource::Exception),
            _ => None,
        }
    }
}

/// Lifecycle status of an issue
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    #[sea_orm(string_value = "unresolved")]
    Unresolved,
    #[sea_orm(string_value = "resolved")]
    Resolved,
    #[sea_orm(string_value = "ignored")]
    Ignored,
}

impl Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Unresolved => "unresolved",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unresolved" => Some(IssueStatus::Unresolved),
            "resolved" => Some(IssueStatus::Resolved),
            "ignored" => Some(IssueStatus::Ignored),
            _ => None,
        }
    }
}

/// Outbox row status.
///
/// `Processing` is the claim marker held while a dispatcher works on the row;
/// `Sent`, `Failed` and `Skipped` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "skipped")]
    Skipped,
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "processing" => Some(NotificationStatus::Processing),
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            "skipped" => Some(NotificationStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent | NotificationStatus::Failed | NotificationStatus::Skipped
        )
    }
}

/// Sink type of a notification setting
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    #[sea_orm(string_value = "email")]
    Email,
    #[sea_orm(string_value = "telegram")]
    Telegram,
    #[sea_orm(string_value = "slack")]
    Slack,
    #[sea_orm(string_value = "mattermost")]
    Mattermost,
    #[sea_orm(string_value = "webhook")]
    Webhook,
    #[sea_orm(string_value = "pachca")]
    Pachca,
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Telegram => "telegram",
            NotificationType::Slack => "slack",
            NotificationType::Mattermost => "mattermost",
            NotificationType::Webhook => "webhook",
            NotificationType::Pachca => "pachca",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "email" => Some(NotificationType::Email),
            "telegram" => Some(NotificationType::Telegram),
            "slack" => Some(NotificationType::Slack),
            "mattermost" => Some(NotificationType::Mattermost),
            "webhook" => Some(NotificationType::Webhook),
            "pachca" => Some(NotificationType::Pachca),
            _ => None,
        }
    }
}
