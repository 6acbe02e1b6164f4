//! Configuration management utilities
//!
//! Every setting has a default and can be overridden through a
//! `FAULTLINE_*` environment variable. Values that fail to parse fall back
//! to the default with a warning instead of aborting startup.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_DATABASE_URL: &str = "FAULTLINE_DATABASE_URL";
pub const ENV_DB_MAX_CONNECTIONS: &str = "FAULTLINE_DB_MAX_CONNECTIONS";
pub const ENV_DB_MIN_CONNECTIONS: &str = "FAULTLINE_DB_MIN_CONNECTIONS";
pub const ENV_REDIS_URL: &str = "FAULTLINE_REDIS_URL";
pub const ENV_THROTTLE_TTL_SECS: &str = "FAULTLINE_THROTTLE_TTL_SECS";
pub const ENV_DISPATCH_INTERVAL_SECS: &str = "FAULTLINE_DISPATCH_INTERVAL_SECS";
pub const ENV_DISPATCH_BATCH_SIZE: &str = "FAULTLINE_DISPATCH_BATCH_SIZE";
pub const ENV_DISPATCH_WORKERS: &str = "FAULTLINE_DISPATCH_WORKERS";
pub const ENV_DISPATCH_CLAIM_TIMEOUT_SECS: &str = "FAULTLINE_DISPATCH_CLAIM_TIMEOUT_SECS";
pub const ENV_BREAKER_FAILURE_THRESHOLD: &str = "FAULTLINE_BREAKER_FAILURE_THRESHOLD";
pub const ENV_BREAKER_COOLDOWN_SECS: &str = "FAULTLINE_BREAKER_COOLDOWN_SECS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "FAULTLINE_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "FAULTLINE_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "FAULTLINE_RETRY_MAX_DELAY_MS";
pub const ENV_INGEST_WORKERS: &str = "FAULTLINE_INGEST_WORKERS";

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            min_connections: 2,
        }
    }
}

/// Redis-backed occurrence counter settings. No URL means the counter is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub redis_url: Option<String>,
    pub ttl_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: 3600,
        }
    }
}

/// Notification dispatcher polling and worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub interval: Duration,
    pub batch_size: u64,
    pub workers: usize,
    /// Rows stuck in `processing` longer than this are taken again.
    pub claim_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
            workers: 4,
            claim_timeout: Duration::from_secs(600),
        }
    }
}

impl DispatcherConfig {
    /// Worker count with the minimum of one applied
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

/// Circuit breaker and retry settings applied to every outbound channel send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_millis(5000),
        }
    }
}

/// Ingress queue consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 2,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub throttle: ThrottleConfig,
    pub dispatcher: DispatcherConfig,
    pub resilience: ResilienceConfig,
    pub ingest: IngestConfig,
}

impl AppConfig {
    /// Build configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        AppConfig {
            database: DatabaseConfig {
                url: non_empty(ENV_DATABASE_URL),
                max_connections: parse_or(
                    &lookup,
                    ENV_DB_MAX_CONNECTIONS,
                    defaults.database.max_connections,
                ),
                min_connections: parse_or(
                    &lookup,
                    ENV_DB_MIN_CONNECTIONS,
                    defaults.database.min_connections,
                ),
            },
            throttle: ThrottleConfig {
                redis_url: non_empty(ENV_REDIS_URL),
                ttl_secs: parse_or(&lookup, ENV_THROTTLE_TTL_SECS, defaults.throttle.ttl_secs),
            },
            dispatcher: DispatcherConfig {
                interval: Duration::from_secs(parse_or(
                    &lookup,
                    ENV_DISPATCH_INTERVAL_SECS,
                    defaults.dispatcher.interval.as_secs(),
                )),
                batch_size: parse_or(
                    &lookup,
                    ENV_DISPATCH_BATCH_SIZE,
                    defaults.dispatcher.batch_size,
                )
                .max(1),
                workers: parse_or(&lookup, ENV_DISPATCH_WORKERS, defaults.dispatcher.workers)
                    .max(1),
                claim_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    ENV_DISPATCH_CLAIM_TIMEOUT_SECS,
                    defaults.dispatcher.claim_timeout.as_secs(),
                )),
            },
            resilience: ResilienceConfig {
                failure_threshold: parse_or(
                    &lookup,
                    ENV_BREAKER_FAILURE_THRESHOLD,
                    defaults.resilience.failure_threshold,
                )
                .max(1),
                cooldown: Duration::from_secs(parse_or(
                    &lookup,
                    ENV_BREAKER_COOLDOWN_SECS,
                    defaults.resilience.cooldown.as_secs(),
                )),
                retry_max_attempts: parse_or(
                    &lookup,
                    ENV_RETRY_MAX_ATTEMPTS,
                    defaults.resilience.retry_max_attempts,
                )
                .max(1),
                retry_base_delay: Duration::from_millis(parse_or(
                    &lookup,
                    ENV_RETRY_BASE_DELAY_MS,
                    defaults.resilience.retry_base_delay.as_millis() as u64,
                )),
                retry_max_delay: Duration::from_millis(parse_or(
                    &lookup,
                    ENV_RETRY_MAX_DELAY_MS,
                    defaults.resilience.retry_max_delay.as_millis() as u64,
                )),
            },
            ingest: IngestConfig {
                workers: parse_or(&lookup, ENV_INGEST_WORKERS, defaults.ingest.workers).max(1),
            },
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    "Invalid value '{}' for {}, falling back to default {}",
                    raw, key, default
                );
                default
            }
        },
        _ => default,
    }
}
