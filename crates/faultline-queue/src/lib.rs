//! Priority-partitioned ingress queue for asynchronous event ingestion
//!
//! Messages are routed onto one of three topics per kind
//! (`envelope.high|normal|low`, `store-event.high|normal|low`) by their
//! priority and consumed high before normal before low.

mod dead_letter;
mod message;
mod queue;

pub use dead_letter::{DeadLetterReason, DeadLetterSink, TracingDeadLetterSink};
pub use message::{
    EnvelopeMessage, IngestMessage, MessageMeta, PriorityBand, StoreEventMessage,
    DEFAULT_MAX_RETRIES, MAX_PRIORITY, MIN_PRIORITY,
};
pub use queue::{IngestQueue, IngestReceiver, QueueError, WeakIngestQueue};
