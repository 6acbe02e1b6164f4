//! Circuit breaker plus bounded retry around channel sends.
//!
//! Each retry attempt goes through the breaker, so a breaker that opens
//! mid-retry stops the remaining attempts. Only transient channel errors
//! are retried.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitState};
pub use retry::RetryPolicy;

use crate::channels::ChannelError;
use faultline_core::ResilienceConfig;
use faultline_entities::types::NotificationType;
use sea_orm::Iterable;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Failed fast, the channel was not invoked
    #[error("circuit breaker open for {channel} channel")]
    CircuitOpen { channel: NotificationType },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ResilienceError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }
}

/// One breaker per channel type, shared by every dispatcher worker
#[derive(Debug, Clone)]
pub struct Resilience {
    breakers: HashMap<NotificationType, Arc<CircuitBreaker>>,
    retry: RetryPolicy,
}

impl Resilience {
    pub fn new(failure_threshold: u32, cooldown: Duration, retry: RetryPolicy) -> Self {
        let breakers = NotificationType::iter()
            .map(|channel| {
                (
                    channel,
                    Arc::new(CircuitBreaker::new(
                        channel.as_str(),
                        failure_threshold,
                        cooldown,
                    )),
                )
            })
            .collect();
        Self { breakers, retry }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.cooldown,
            RetryPolicy::from_config(config),
        )
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn breaker(&self, channel: NotificationType) -> Option<&CircuitBreaker> {
        self.breakers.get(&channel).map(Arc::as_ref)
    }

    pub fn state(&self, channel: NotificationType) -> CircuitState {
        self.breaker(channel)
            .map(CircuitBreaker::state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Run `operation` under the breaker for `channel`, retrying transient
    /// failures with backoff
    pub async fn call<F, Fut>(
        &self,
        channel: NotificationType,
        mut operation: F,
    ) -> Result<(), ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ChannelError>>,
    {
        let breaker = self.breakers.get(&channel);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            // Held across the call so a panic or cancellation frees a half-open trial
            let permit = match breaker {
                Some(breaker) => match breaker.try_acquire() {
                    Some(permit) => Some(permit),
                    None => return Err(ResilienceError::CircuitOpen { channel }),
                },
                None => None,
            };

            let error = match operation().await {
                Ok(()) => {
                    if let Some(permit) = permit {
                        permit.success();
                    }
                    return Ok(());
                }
                Err(error) => error,
            };

            if let Some(permit) = permit {
                if error.counts_against_channel() {
                    permit.failure();
                } else {
                    permit.release();
                }
            }

            if !error.is_transient() || !self.retry.should_retry(attempt) {
                return Err(error.into());
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                channel = %channel,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying channel send"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}
