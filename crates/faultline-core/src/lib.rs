//! Core utilities and types shared across all Faultline crates

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use types::*;

// Re-export external dependencies
pub use chrono;
pub use serde_json;
