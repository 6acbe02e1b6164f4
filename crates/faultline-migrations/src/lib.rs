//! Database migrations for Faultline
//!
//! Every migration runs on both PostgreSQL and SQLite; the SQLite path is
//! what the test suites use.

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;
