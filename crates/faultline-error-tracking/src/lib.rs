//! Event ingestion: normalization, fingerprinting, occurrence counting and
//! the issue status state machine.

pub mod event;
pub mod fingerprint;
pub mod issues;
pub mod normalizer;
pub mod services;
pub mod throttle;
pub mod worker;

pub use event::{Event, EventMinimal, ExceptionData, GroupHash};
pub use fingerprint::{full_fingerprint, minimal_fingerprint};
pub use normalizer::{normalize_event, normalize_minimal, NormalizeError};
pub use services::*;
pub use throttle::{NoopCounter, OccurrenceCounter, RedisThrottleCounter, ThrottleError};
pub use worker::{EventProcessor, IngestWorker};
