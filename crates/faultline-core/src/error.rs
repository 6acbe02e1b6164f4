//! Errors raised while bringing a Faultline process up

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Database connection failed: {0}")]
    Database(String),

    #[error("Database migration failed: {0}")]
    Migration(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
