use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Topic suffix a priority maps to.
///
/// | priority | band   |
/// |----------|--------|
/// | 8-10     | high   |
/// | 4-7      | normal |
/// | 1-3      | low    |
///
/// Out of range priorities are clamped into 1-10 first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBand {
    High,
    Normal,
    Low,
}

impl PriorityBand {
    pub fn from_priority(priority: u8) -> Self {
        match priority.clamp(MIN_PRIORITY, MAX_PRIORITY) {
            8..=10 => PriorityBand::High,
            4..=7 => PriorityBand::Normal,
            _ => PriorityBand::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityBand::High => "high",
            PriorityBand::Normal => "normal",
            PriorityBand::Low => "low",
        }
    }
}

impl fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing metadata shared by every ingress message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub priority: u8,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Unix seconds after which the message must not be processed; `0` never expires
    #[serde(default)]
    pub deadline: i64,
    #[serde(default = "default_worker_pool")]
    pub worker_pool: String,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_worker_pool() -> String {
    "default".to_string()
}

impl MessageMeta {
    pub fn new(priority: u8, ttl: Option<Duration>) -> Self {
        let deadline = ttl
            .map(|ttl| Utc::now().timestamp() + ttl.as_secs() as i64)
            .unwrap_or(0);
        Self {
            priority: priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            deadline,
            worker_pool: default_worker_pool(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_worker_pool(mut self, pool: impl Into<String>) -> Self {
        self.worker_pool = pool.into();
        self
    }

    pub fn band(&self) -> PriorityBand {
        PriorityBand::from_priority(self.priority)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        self.deadline > 0 && now_unix > self.deadline
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// One or more raw event payloads delivered together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,
    pub project_id: i32,
    pub payloads: Vec<Value>,
}

/// A single raw event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEventMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,
    pub project_id: i32,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum IngestMessage {
    Envelope(EnvelopeMessage),
    StoreEvent(StoreEventMessage),
}

impl IngestMessage {
    pub fn store_event(project_id: i32, payload: Value, meta: MessageMeta) -> Self {
        IngestMessage::StoreEvent(StoreEventMessage {
            meta,
            project_id,
            payload,
        })
    }

    pub fn envelope(project_id: i32, payloads: Vec<Value>, meta: MessageMeta) -> Self {
        IngestMessage::Envelope(EnvelopeMessage {
            meta,
            project_id,
            payloads,
        })
    }

    pub fn meta(&self) -> &MessageMeta {
        match self {
            IngestMessage::Envelope(m) => &m.meta,
            IngestMessage::StoreEvent(m) => &m.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut MessageMeta {
        match self {
            IngestMessage::Envelope(m) => &mut m.meta,
            IngestMessage::StoreEvent(m) => &mut m.meta,
        }
    }

    pub fn project_id(&self) -> i32 {
        match self {
            IngestMessage::Envelope(m) => m.project_id,
            IngestMessage::StoreEvent(m) => m.project_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IngestMessage::Envelope(_) => "envelope",
            IngestMessage::StoreEvent(_) => "store-event",
        }
    }

    /// Topic name such as `envelope.high` or `store-event.low`
    pub fn topic(&self) -> String {
        format!("{}.{}", self.kind(), self.meta().band())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_bands() {
        assert_eq!(PriorityBand::from_priority(10), PriorityBand::High);
        assert_eq!(PriorityBand::from_priority(8), PriorityBand::High);
        assert_eq!(PriorityBand::from_priority(7), PriorityBand::Normal);
        assert_eq!(PriorityBand::from_priority(4), PriorityBand::Normal);
        assert_eq!(PriorityBand::from_priority(3), PriorityBand::Low);
        assert_eq!(PriorityBand::from_priority(1), PriorityBand::Low);
        // clamped
        assert_eq!(PriorityBand::from_priority(0), PriorityBand::Low);
        assert_eq!(PriorityBand::from_priority(200), PriorityBand::High);
    }

    #[test]
    fn test_expiry() {
        let mut meta = MessageMeta::new(5, None);
        assert!(!meta.is_expired_at(i64::MAX));

        meta.deadline = 1_000;
        assert!(!meta.is_expired_at(999));
        assert!(!meta.is_expired_at(1_000));
        assert!(meta.is_expired_at(1_001));

        let fresh = MessageMeta::new(5, Some(Duration::from_secs(60)));
        assert!(!fresh.is_expired());
    }

    #[test]
    fn test_can_retry() {
        let mut meta = MessageMeta::new(5, None).with_max_retries(2);
        assert!(meta.can_retry());
        meta.retry_count = 1;
        assert!(meta.can_retry());
        meta.retry_count = 2;
        assert!(!meta.can_retry());

        let never = MessageMeta::new(5, None).with_max_retries(0);
        assert!(!never.can_retry());
    }

    #[test]
    fn test_topics() {
        let msg = IngestMessage::store_event(1, json!({}), MessageMeta::new(9, None));
        assert_eq!(msg.topic(), "store-event.high");

        let msg = IngestMessage::envelope(1, vec![], MessageMeta::new(2, None));
        assert_eq!(msg.topic(), "envelope.low");
    }

    #[test]
    fn test_wire_format() {
        let raw = json!({
            "kind": "store-event",
            "priority": 6,
            "retry_count": 1,
            "max_retries": 4,
            "deadline": 1700000000,
            "worker_pool": "ingest",
            "project_id": 3,
            "payload": {"event_id": "abc"}
        });
        let msg: IngestMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.project_id(), 3);
        assert_eq!(msg.meta().retry_count, 1);
        assert_eq!(msg.meta().max_retries, 4);
        assert_eq!(msg.meta().worker_pool, "ingest");
        assert_eq!(msg.topic(), "store-event.normal");

        // Optional metadata falls back to defaults
        let minimal: IngestMessage = serde_json::from_value(json!({
            "kind": "envelope",
            "priority": 9,
            "project_id": 1,
            "payloads": [{"event_id": "a"}, {"event_id": "b"}]
        }))
        .unwrap();
        assert_eq!(minimal.meta().max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(minimal.meta().deadline, 0);
        assert_eq!(minimal.meta().worker_pool, "default");
    }
}
