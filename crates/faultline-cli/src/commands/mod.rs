pub mod ingest;
pub mod migrate;
pub mod serve;
pub mod test_notification;

pub use ingest::IngestCommand;
pub use migrate::MigrateCommand;
pub use serve::ServeCommand;
pub use test_notification::TestNotificationCommand;

use faultline_core::AppConfig;
use faultline_error_tracking::{NoopCounter, OccurrenceCounter, RedisThrottleCounter};
use std::sync::Arc;
use tracing::{info, warn};

/// Environment configuration with the command line database url applied on top
pub(crate) fn load_config(database_url: Option<String>) -> AppConfig {
    let mut config = AppConfig::from_env();
    if let Some(url) = database_url.filter(|url| !url.trim().is_empty()) {
        config.database.url = Some(url);
    }
    config
}

/// Redis occurrence counter when configured and reachable, otherwise a no-op
pub(crate) async fn occurrence_counter(config: &AppConfig) -> Arc<dyn OccurrenceCounter> {
    let Some(url) = config.throttle.redis_url.as_deref() else {
        info!("No Redis url configured, occurrence throttling disabled");
        return Arc::new(NoopCounter);
    };

    match RedisThrottleCounter::connect(url, config.throttle.ttl_secs).await {
        Ok(counter) => {
            info!(ttl_secs = config.throttle.ttl_secs, "Connected to Redis occurrence counter");
            Arc::new(counter)
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, occurrence throttling disabled");
            Arc::new(NoopCounter)
        }
    }
}
