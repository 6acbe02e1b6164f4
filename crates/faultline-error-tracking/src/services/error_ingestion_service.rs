use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::issue_service::IssueService;
use super::types::{ErrorTrackingError, RecordedEvent};
use crate::event::Event;
use crate::fingerprint::minimal_fingerprint;
use crate::normalizer::{normalize_event, normalize_minimal};
use crate::throttle::{spawn_increment, NoopCounter, OccurrenceCounter};
use faultline_database::repositories::issues as issue_repo;

/// Service for ingesting raw event payloads
pub struct ErrorIngestionService {
    db: Arc<DatabaseConnection>,
    issues: IssueService,
    counter: Arc<dyn OccurrenceCounter>,
}

impl ErrorIngestionService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self::with_counter(db, Arc::new(NoopCounter))
    }

    /// Create with a throttle counter
    pub fn with_counter(db: Arc<DatabaseConnection>, counter: Arc<dyn OccurrenceCounter>) -> Self {
        Self {
            issues: IssueService::new(db.clone()),
            db,
            counter,
        }
    }

    pub fn issues(&self) -> &IssueService {
        &self.issues
    }

    /// Normalize a raw payload and record it - core entry point
    pub async fn ingest(
        &self,
        project_id: i32,
        payload: &Value,
    ) -> Result<RecordedEvent, ErrorTrackingError> {
        let event = normalize_event(payload, project_id)?;
        self.process_event(&event).await
    }

    /// Record an already normalized event.
    ///
    /// The throttle counter is bumped only after the transaction committed,
    /// and its outcome never reaches the caller.
    pub async fn process_event(&self, event: &Event) -> Result<RecordedEvent, ErrorTrackingError> {
        let recorded = self.issues.record_event(event).await?;
        spawn_increment(self.counter.clone(), event.project_id, event.group_hash.clone());

        debug!(
            project_id = event.project_id,
            event_id = %event.event_id,
            issue_id = recorded.issue.id,
            "Ingested event"
        );
        Ok(recorded)
    }

    /// Cheap duplicate check: does an issue already exist for this payload's fingerprint?
    pub async fn is_known_fingerprint(
        &self,
        project_id: i32,
        payload: &Value,
    ) -> Result<bool, ErrorTrackingError> {
        let minimal = normalize_minimal(payload)?;
        let hash = minimal_fingerprint(&minimal);
        Ok(
            issue_repo::find_by_fingerprint(self.db.as_ref(), project_id, hash.as_str())
                .await?
                .is_some(),
        )
    }
}
