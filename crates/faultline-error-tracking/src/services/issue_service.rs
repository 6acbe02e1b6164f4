//! Issue upsert and status transitions.
//!
//! Every transition runs inside one transaction together with its resolution
//! row and outbox rows: repeatable read on the event path, read committed for
//! explicit status changes.

use super::types::{ErrorTrackingError, RecordedEvent, StatusChange};
use crate::event::Event;
use crate::issues::{classify_occurrence, is_regression, validate_status_change};
use chrono::Utc;
use faultline_database::repositories::{
    issues as issue_repo, notifications_queue as outbox, projects as project_repo,
    resolutions as resolution_repo, teams as team_repo, NewIssue, NewNotification,
    NewResolution,
};
use faultline_entities::types::IssueStatus;
use faultline_entities::{events, resolutions};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction,
    DbErr, IsolationLevel, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info};

const REGRESSION_COMMENT: &str = "Regression: new event for a resolved issue";

#[derive(Clone)]
pub struct IssueService {
    db: Arc<DatabaseConnection>,
}

impl IssueService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// SQLite has a single isolation level and rejects the statement
    async fn begin(&self, isolation: IsolationLevel) -> Result<DatabaseTransaction, DbErr> {
        let isolation = match self.db.get_database_backend() {
            DatabaseBackend::Sqlite => None,
            _ => Some(isolation),
        };
        self.db.begin_with_config(isolation, None).await
    }

    /// Attach an event to the issue for its fingerprint, creating or reopening
    /// the issue as needed, and enqueue a notification when the occurrence is
    /// a new issue or a regression.
    pub async fn record_event(&self, event: &Event) -> Result<RecordedEvent, ErrorTrackingError> {
        let txn = self.begin(IsolationLevel::RepeatableRead).await?;

        if project_repo::find_by_id(&txn, event.project_id).await?.is_none() {
            return Err(ErrorTrackingError::ProjectNotFound(event.project_id));
        }

        let existing =
            issue_repo::find_by_fingerprint(&txn, event.project_id, event.group_hash.as_str())
                .await?;
        let outcome = classify_occurrence(existing.as_ref().map(|issue| issue.status));

        let issue = match existing {
            None => {
                issue_repo::insert(
                    &txn,
                    NewIssue {
                        project_id: event.project_id,
                        fingerprint: event.group_hash.to_string(),
                        source: event.source,
                        title: event.title(),
                        level: event.level,
                        platform: event.platform.clone(),
                        seen_at: event.timestamp,
                    },
                )
                .await?
            }
            Some(issue) => {
                issue_repo::record_occurrence(&txn, &issue, event.timestamp, outcome.reopens())
                    .await?
            }
        };

        let event_row_id = insert_event_row(&txn, issue.id, event).await?;

        if outcome.reopens() {
            resolution_repo::create(
                &txn,
                NewResolution {
                    issue_id: issue.id,
                    status: IssueStatus::Unresolved,
                    resolved_by: None,
                    comment: Some(REGRESSION_COMMENT.to_string()),
                },
            )
            .await?;
        }

        let notification = if outcome.is_notification_worthy() {
            Some(
                outbox::enqueue(
                    &txn,
                    NewNotification {
                        project_id: issue.project_id,
                        issue_id: issue.id,
                        user_id: None,
                        level: event.level,
                        is_new: outcome.is_new(),
                        was_reactivated: outcome.was_reactivated(),
                    },
                )
                .await?,
            )
        } else {
            None
        };

        txn.commit().await?;

        debug!(
            issue_id = issue.id,
            project_id = issue.project_id,
            outcome = ?outcome,
            total_events = issue.total_events,
            "Recorded event"
        );

        Ok(RecordedEvent {
            issue,
            event_row_id,
            outcome,
            notification,
        })
    }

    /// Explicit status change by a user with access to the issue's project.
    ///
    /// A `resolved -> unresolved` change enqueues a regression notification
    /// for every member of the owning team. If any of those inserts fails the
    /// whole change is rolled back.
    pub async fn change_status(
        &self,
        issue_id: i32,
        new_status: IssueStatus,
        user_id: i32,
        comment: Option<String>,
    ) -> Result<StatusChange, ErrorTrackingError> {
        let txn = self.begin(IsolationLevel::ReadCommitted).await?;

        let issue = issue_repo::find_by_id(&txn, issue_id)
            .await?
            .ok_or(ErrorTrackingError::IssueNotFound(issue_id))?;

        let accessible = project_repo::accessible_project_ids(&txn, user_id).await?;
        if !accessible.contains(&issue.project_id) {
            return Err(ErrorTrackingError::PermissionDenied {
                user_id,
                project_id: issue.project_id,
            });
        }

        validate_status_change(issue.status, new_status)
            .map_err(ErrorTrackingError::InvalidTransition)?;
        let regression = is_regression(issue.status, new_status);

        let resolution = resolution_repo::create(
            &txn,
            NewResolution {
                issue_id,
                status: new_status,
                resolved_by: Some(user_id),
                comment,
            },
        )
        .await?;
        issue_repo::update_status(&txn, issue_id, new_status).await?;

        let mut notifications = Vec::new();
        if regression {
            let project = project_repo::find_by_id(&txn, issue.project_id)
                .await?
                .ok_or(ErrorTrackingError::ProjectNotFound(issue.project_id))?;

            let members = match project.team_id {
                Some(team_id) => team_repo::find_members(&txn, team_id).await?,
                None => Vec::new(),
            };

            for member in members {
                let notification = outbox::enqueue(
                    &txn,
                    NewNotification {
                        project_id: issue.project_id,
                        issue_id,
                        user_id: Some(member.id),
                        level: issue.level,
                        is_new: false,
                        was_reactivated: true,
                    },
                )
                .await?;
                notifications.push(notification);
            }
        }

        let issue = issue_repo::find_by_id(&txn, issue_id)
            .await?
            .ok_or(ErrorTrackingError::IssueNotFound(issue_id))?;

        txn.commit().await?;

        info!(
            issue_id,
            user_id,
            status = %new_status,
            regression,
            recipients = notifications.len(),
            "Issue status changed"
        );

        Ok(StatusChange {
            issue,
            resolution,
            regression,
            notifications,
        })
    }

    pub async fn resolution_history(
        &self,
        issue_id: i32,
    ) -> Result<Vec<resolutions::Model>, ErrorTrackingError> {
        Ok(resolution_repo::find_by_issue_id(self.db.as_ref(), issue_id).await?)
    }
}

async fn insert_event_row<C: ConnectionTrait>(
    conn: &C,
    issue_id: i32,
    event: &Event,
) -> Result<i32, DbErr> {
    let (exception_type, exception_value, stacktrace) = match &event.exception {
        Some(exception) => (
            Some(exception.exception_type.clone()),
            Some(exception.value.clone()),
            exception.stacktrace.as_ref().map(|st| st.to_string()),
        ),
        None => (None, None, None),
    };

    let tags = serde_json::to_string(&event.tags).unwrap_or_else(|_| "{}".to_string());

    let row = events::ActiveModel {
        issue_id: Set(issue_id),
        project_id: Set(event.project_id),
        event_id: Set(event.event_id.clone()),
        group_hash: Set(event.group_hash.to_string()),
        timestamp: Set(event.timestamp),
        level: Set(event.level),
        source: Set(event.source),
        platform: Set(event.platform.clone()),
        message: Set(event.message.clone()),
        environment: Set(event.environment.clone()),
        release: Set(event.release.clone()),
        server_name: Set(event.server_name.clone()),
        tags: Set(tags),
        exception_type: Set(exception_type),
        exception_value: Set(exception_value),
        stacktrace: Set(stacktrace),
        contexts: Set(event.contexts_json().to_string()),
        payload: Set(event.raw_payload.clone()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok(row.id)
}
