//! Database connection, repository contracts and their sea-orm implementations

pub use sea_orm;
mod connection;
pub mod repositories;

pub use connection::{establish_connection, DbConnection};

// Export test utilities for use by other crates in their tests
pub mod test_utils;
