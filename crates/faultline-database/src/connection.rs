//! Database connection management

use faultline_core::{DatabaseConfig, ServiceError, ServiceResult};
use faultline_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tracing::info;

pub type DbConnection = DatabaseConnection;

/// Connect using the configured pool limits and bring the schema up to date.
pub async fn establish_connection(config: &DatabaseConfig) -> ServiceResult<Arc<DbConnection>> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| ServiceError::Configuration {
            message: "database url is not set (FAULTLINE_DATABASE_URL)".to_string(),
        })?;

    let mut opt = ConnectOptions::new(url.to_owned());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Migration(e.to_string()))?;

    info!(
        max_connections = config.max_connections,
        "Database connection established"
    );

    Ok(Arc::new(db))
}
