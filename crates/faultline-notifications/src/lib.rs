//! Notification delivery: rule filter, channels, resilience and the outbox dispatcher

pub mod channels;
pub mod dispatcher;
pub mod resilience;
pub mod rules;

pub use channels::{Channel, ChannelError, ChannelRegistry};
pub use dispatcher::{
    CycleStats, DispatchOutcome, DispatchResult, DispatcherError, DispatcherHandle,
    DispatcherRepositories, NotificationDispatcher,
};
pub use resilience::{
    CircuitBreaker, CircuitPermit, CircuitState, Resilience, ResilienceError, RetryPolicy,
};
pub use rules::{rule_matches, select_settings, RuleContext};
