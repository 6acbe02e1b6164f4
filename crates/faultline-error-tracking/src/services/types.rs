use crate::issues::OccurrenceOutcome;
use crate::normalizer::NormalizeError;
use faultline_database::repositories::RepositoryError;
use faultline_entities::types::IssueStatus;
use faultline_entities::{issues, notifications, resolutions};
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorTrackingError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Malformed event: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("User {user_id} has no access to project {project_id}")]
    PermissionDenied { user_id: i32, project_id: i32 },

    #[error("Issue {0} not found")]
    IssueNotFound(i32),

    #[error("Project {0} not found")]
    ProjectNotFound(i32),

    #[error("Issue is already {0}")]
    InvalidTransition(IssueStatus),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorTrackingError {
    /// Only infrastructure failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorTrackingError::Database(_))
    }
}

impl From<RepositoryError> for ErrorTrackingError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(e) => ErrorTrackingError::Database(e),
            RepositoryError::NotFound { entity: "issue", id } => ErrorTrackingError::IssueNotFound(id),
            RepositoryError::NotFound { entity: "project", id } => {
                ErrorTrackingError::ProjectNotFound(id)
            }
            other => ErrorTrackingError::Internal(other.to_string()),
        }
    }
}

/// Result of recording one event against its issue
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub issue: issues::Model,
    pub event_row_id: i32,
    pub outcome: OccurrenceOutcome,
    /// Outbox row created for a new issue or a regression
    pub notification: Option<notifications::Model>,
}

/// Result of an explicit status change
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub issue: issues::Model,
    pub resolution: resolutions::Model,
    pub regression: bool,
    /// One row per member of the project's team when the change was a regression
    pub notifications: Vec<notifications::Model>,
}
