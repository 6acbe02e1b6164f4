pub mod error_ingestion_service;
pub mod issue_service;
pub mod types;

pub use error_ingestion_service::ErrorIngestionService;
pub use issue_service::IssueService;
pub use types::*;
