use crate::message::IngestMessage;
use async_trait::async_trait;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// Deadline passed before the message was processed
    Expired,
    /// Payload can never be processed
    Malformed,
    /// Processing was refused by a business rule (unknown project, ...)
    Rejected,
    /// Transient failures exhausted `max_retries`
    RetriesExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Expired => "expired",
            DeadLetterReason::Malformed => "malformed",
            DeadLetterReason::Rejected => "rejected",
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Destination for ingress messages that will not be processed
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, message: IngestMessage, reason: DeadLetterReason, detail: &str);
}

/// Dead-letter sink that only records the drop in the operator log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn dead_letter(&self, message: IngestMessage, reason: DeadLetterReason, detail: &str) {
        let meta = message.meta();
        warn!(
            topic = %message.topic(),
            project_id = message.project_id(),
            retry_count = meta.retry_count,
            worker_pool = %meta.worker_pool,
            reason = %reason,
            "Dead-lettered ingress message: {}",
            detail
        );
    }
}
