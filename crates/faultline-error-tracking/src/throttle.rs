//! Best-effort per-project occurrence counter backed by Redis.
//!
//! Counts are never read back by the ingestion path and a Redis failure must
//! never fail an ingest, so callers go through [`spawn_increment`].

use crate::event::GroupHash;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// KEYS[1] = per-fingerprint hash, KEYS[2] = sorted-set index
/// ARGV[1] = fingerprint, ARGV[2] = ttl seconds
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('HINCRBY', KEYS[1], ARGV[1], 1)
redis.call('ZINCRBY', KEYS[2], 1, ARGV[1])
if redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
if redis.call('TTL', KEYS[2]) == -1 then
    redis.call('EXPIRE', KEYS[2], ARGV[2])
end
return count
"#;

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait OccurrenceCounter: Send + Sync {
    /// Bump the counter for `group_hash` and return the new count
    async fn increment(&self, project_id: i32, group_hash: &GroupHash) -> Result<i64, ThrottleError>;
}

pub struct RedisThrottleCounter {
    connection: ConnectionManager,
    script: redis::Script,
    ttl_secs: u64,
}

impl RedisThrottleCounter {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Result<Self, ThrottleError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        debug!(ttl_secs, "Connected throttle counter to Redis");
        Ok(Self {
            connection,
            script: redis::Script::new(INCREMENT_SCRIPT),
            ttl_secs,
        })
    }

    pub fn counts_key(project_id: i32) -> String {
        format!("throttle:p{}:counts", project_id)
    }

    pub fn index_key(project_id: i32) -> String {
        format!("throttle:p{}:index", project_id)
    }
}

#[async_trait]
impl OccurrenceCounter for RedisThrottleCounter {
    async fn increment(&self, project_id: i32, group_hash: &GroupHash) -> Result<i64, ThrottleError> {
        let mut connection = self.connection.clone();
        let count: i64 = self
            .script
            .key(Self::counts_key(project_id))
            .key(Self::index_key(project_id))
            .arg(group_hash.as_str())
            .arg(self.ttl_secs)
            .invoke_async(&mut connection)
            .await?;
        Ok(count)
    }
}

/// Used when no Redis URL is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCounter;

#[async_trait]
impl OccurrenceCounter for NoopCounter {
    async fn increment(&self, _project_id: i32, _group_hash: &GroupHash) -> Result<i64, ThrottleError> {
        Ok(0)
    }
}

/// Fire-and-forget increment. Errors are logged and dropped.
pub fn spawn_increment(
    counter: Arc<dyn OccurrenceCounter>,
    project_id: i32,
    group_hash: GroupHash,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = counter.increment(project_id, &group_hash).await {
            warn!(
                project_id,
                group_hash = %group_hash,
                "Throttle counter increment failed: {}",
                e
            );
        }
    })
}
