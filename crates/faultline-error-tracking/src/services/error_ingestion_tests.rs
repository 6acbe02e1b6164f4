use super::*;
use crate::issues::OccurrenceOutcome;
use crate::normalizer::NormalizeError;
use crate::throttle::ThrottleError;
use async_trait::async_trait;
use faultline_database::repositories::notifications_queue;
use faultline_database::test_utils::TestDatabase;
use faultline_entities::types::{EventLevel, EventSource, IssueStatus, NotificationStatus};
use faultline_entities::{events, issues};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

async fn setup_test_db() -> TestDatabase {
    TestDatabase::new()
        .await
        .expect("Failed to create test database")
}

fn boom(event_id: &str) -> Value {
    json!({"event_id": event_id, "message": "boom", "level": "error", "platform": "go"})
}

struct MockCounter {
    calls: mpsc::UnboundedSender<(i32, String)>,
}

#[async_trait]
impl OccurrenceCounter for MockCounter {
    async fn increment(
        &self,
        project_id: i32,
        group_hash: &crate::event::GroupHash,
    ) -> Result<i64, ThrottleError> {
        let _ = self.calls.send((project_id, group_hash.to_string()));
        Ok(1)
    }
}

async fn issue_count(db: &DatabaseConnection) -> u64 {
    issues::Entity::find().count(db).await.unwrap()
}

#[tokio::test]
async fn test_identical_events_group_into_one_issue() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let first = service.ingest(project.id, &boom("1")).await.unwrap();
    let second = service.ingest(project.id, &boom("1")).await.unwrap();

    assert_eq!(first.outcome, OccurrenceOutcome::NewIssue);
    assert_eq!(second.outcome, OccurrenceOutcome::Recurrence);
    assert_eq!(first.issue.id, second.issue.id);
    assert_eq!(second.issue.total_events, 2);
    assert_eq!(second.issue.status, IssueStatus::Unresolved);
    assert_eq!(issue_count(test_db.db.as_ref()).await, 1);

    let stored_events = events::Entity::find()
        .filter(events::Column::IssueId.eq(first.issue.id))
        .all(test_db.db.as_ref())
        .await
        .unwrap();
    assert_eq!(stored_events.len(), 2);
    assert!(stored_events
        .iter()
        .all(|e| e.group_hash == first.issue.fingerprint));

    // Only the new issue is notification-worthy
    assert!(first.notification.is_some());
    assert!(second.notification.is_none());
    let queued = notifications_queue::find_by_issue_id(test_db.db.as_ref(), first.issue.id)
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert!(queued[0].is_new);
    assert!(!queued[0].was_reactivated);
    assert_eq!(queued[0].status, NotificationStatus::Pending);
    assert_eq!(queued[0].level, EventLevel::Error);
}

#[tokio::test]
async fn test_new_issue_fields() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let recorded = service
        .ingest(
            project.id,
            &json!({
                "event_id": "e-1",
                "timestamp": "2024-03-01T10:00:00Z",
                "platform": "python",
                "exception": {"type": "KeyError", "value": "'user_id'"}
            }),
        )
        .await
        .unwrap();

    let issue = recorded.issue;
    assert_eq!(issue.project_id, project.id);
    assert_eq!(issue.source, EventSource::Exception);
    assert_eq!(issue.level, EventLevel::Exception);
    assert_eq!(issue.title, "KeyError: 'user_id'");
    assert_eq!(issue.platform, "python");
    assert_eq!(issue.total_events, 1);
    assert_eq!(issue.first_seen, issue.last_seen);
    assert_eq!(issue.fingerprint.len(), 40);
    assert!(issue.last_notification.is_none());

    let row = events::Entity::find_by_id(recorded.event_row_id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.event_id, "e-1");
    assert_eq!(row.message, "'user_id'");
    assert_eq!(row.exception_type.as_deref(), Some("KeyError"));
    assert!(row.stacktrace.is_none());
    let payload: Value = serde_json::from_str(&row.payload).unwrap();
    assert_eq!(payload["exception"]["type"], "KeyError");
}

#[tokio::test]
async fn test_last_seen_only_moves_forward() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let mut late = boom("late");
    late["timestamp"] = json!("2024-06-01T00:00:00Z");
    let mut early = boom("early");
    early["timestamp"] = json!("2024-01-01T00:00:00Z");

    let first = service.ingest(project.id, &late).await.unwrap();
    let second = service.ingest(project.id, &early).await.unwrap();
    assert_eq!(second.issue.last_seen, first.issue.last_seen);
    assert_eq!(second.issue.total_events, 2);
}

#[tokio::test]
async fn test_resolved_issue_regresses_on_new_event() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let first = service.ingest(project.id, &boom("1")).await.unwrap();
    faultline_database::repositories::issues::update_status(
        test_db.db.as_ref(),
        first.issue.id,
        IssueStatus::Resolved,
    )
    .await
    .unwrap();

    let regressed = service.ingest(project.id, &boom("2")).await.unwrap();
    assert_eq!(regressed.outcome, OccurrenceOutcome::Regression);
    assert_eq!(regressed.issue.status, IssueStatus::Unresolved);
    assert_eq!(regressed.issue.total_events, 2);

    let notification = regressed.notification.expect("regression must notify");
    assert!(notification.was_reactivated);
    assert!(!notification.is_new);
    assert_eq!(notification.status, NotificationStatus::Pending);

    // the system transition is recorded without a resolver
    let history = service.issues().resolution_history(first.issue.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, IssueStatus::Unresolved);
    assert!(history[0].resolved_by.is_none());

    // a further event on the now unresolved issue does not notify again
    let again = service.ingest(project.id, &boom("3")).await.unwrap();
    assert_eq!(again.outcome, OccurrenceOutcome::Recurrence);
    assert!(again.notification.is_none());
    let queued = notifications_queue::find_by_issue_id(test_db.db.as_ref(), first.issue.id)
        .await
        .unwrap();
    assert_eq!(queued.len(), 2);
}

#[tokio::test]
async fn test_ignored_issue_stays_ignored() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let first = service.ingest(project.id, &boom("1")).await.unwrap();
    faultline_database::repositories::issues::update_status(
        test_db.db.as_ref(),
        first.issue.id,
        IssueStatus::Ignored,
    )
    .await
    .unwrap();

    let next = service.ingest(project.id, &boom("2")).await.unwrap();
    assert_eq!(next.outcome, OccurrenceOutcome::Recurrence);
    assert_eq!(next.issue.status, IssueStatus::Ignored);
    assert!(next.notification.is_none());
}

#[tokio::test]
async fn test_fatal_exception_is_grouped_as_event() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let recorded = service
        .ingest(
            project.id,
            &json!({"event_id": "1", "level": "fatal", "exception": {"type": "T", "value": "V"}}),
        )
        .await
        .unwrap();
    assert_eq!(recorded.issue.source, EventSource::Event);
    assert_eq!(recorded.issue.level, EventLevel::Fatal);
    assert_eq!(recorded.notification.unwrap().level, EventLevel::Fatal);
}

#[tokio::test]
async fn test_malformed_payload_writes_nothing() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let err = service
        .ingest(project.id, &json!({"message": "no id"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ErrorTrackingError::Normalize(NormalizeError::MissingEventId)
    ));
    assert!(!err.is_retryable());

    let err = service
        .ingest(project.id, &json!({"event_id": "1", "exception": {}}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ErrorTrackingError::Normalize(NormalizeError::MalformedException(_))
    ));
    assert_eq!(issue_count(test_db.db.as_ref()).await, 0);
}

#[tokio::test]
async fn test_unknown_project_is_rejected() {
    let test_db = setup_test_db().await;
    let service = ErrorIngestionService::new(test_db.db.clone());

    let err = service.ingest(4242, &boom("1")).await.unwrap_err();
    assert!(matches!(err, ErrorTrackingError::ProjectNotFound(4242)));
    assert!(!err.is_retryable());
    assert_eq!(issue_count(test_db.db.as_ref()).await, 0);
}

#[tokio::test]
async fn test_projects_are_isolated() {
    let test_db = setup_test_db().await;
    let api = test_db.create_project("api", None).await.unwrap();
    let web = test_db.create_project("web", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    let a = service.ingest(api.id, &boom("1")).await.unwrap();
    let b = service.ingest(web.id, &boom("1")).await.unwrap();
    assert_ne!(a.issue.id, b.issue.id);
    assert_eq!(a.issue.fingerprint, b.issue.fingerprint);
    assert_eq!(b.outcome, OccurrenceOutcome::NewIssue);
}

#[tokio::test]
async fn test_throttle_counter_is_bumped_after_commit() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let service =
        ErrorIngestionService::with_counter(test_db.db.clone(), Arc::new(MockCounter { calls: tx }));

    let recorded = service.ingest(project.id, &boom("1")).await.unwrap();

    let (project_id, hash) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("counter was not called")
        .unwrap();
    assert_eq!(project_id, project.id);
    assert_eq!(hash, recorded.issue.fingerprint);

    // rejected events never reach the counter
    let _ = service.ingest(project.id, &json!({})).await;
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_is_known_fingerprint() {
    let test_db = setup_test_db().await;
    let project = test_db.create_project("api", None).await.unwrap();
    let service = ErrorIngestionService::new(test_db.db.clone());

    // no event_id needed for the minimal check
    let minimal = json!({"message": "boom", "level": "error", "platform": "go"});
    assert!(!service.is_known_fingerprint(project.id, &minimal).await.unwrap());

    service.ingest(project.id, &boom("1")).await.unwrap();
    assert!(service.is_known_fingerprint(project.id, &minimal).await.unwrap());

    let other = json!({"message": "boom", "level": "warning", "platform": "go"});
    assert!(!service.is_known_fingerprint(project.id, &other).await.unwrap());
}

// ========================================
// Explicit status changes
// ========================================

#[tokio::test]
async fn test_change_status_requires_project_access() {
    let test_db = setup_test_db().await;
    let team = test_db.create_team("core").await.unwrap();
    let project = test_db.create_project("api", Some(team.id)).await.unwrap();
    let outsider = test_db.create_user("outsider@example.com").await.unwrap();
    let issue = test_db
        .create_issue(project.id, "fp-1", IssueStatus::Unresolved)
        .await
        .unwrap();
    let service = IssueService::new(test_db.db.clone());

    let err = service
        .change_status(issue.id, IssueStatus::Resolved, outsider.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ErrorTrackingError::PermissionDenied { user_id, project_id }
            if user_id == outsider.id && project_id == project.id
    ));

    let unchanged = issues::Entity::find_by_id(issue.id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.status, IssueStatus::Unresolved);
    assert!(service.resolution_history(issue.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_change_status_writes_resolution_and_status() {
    let test_db = setup_test_db().await;
    let team = test_db.create_team("core").await.unwrap();
    let project = test_db.create_project("api", Some(team.id)).await.unwrap();
    let user = test_db.create_user("dev@example.com").await.unwrap();
    test_db.add_team_member(team.id, user.id).await.unwrap();
    let issue = test_db
        .create_issue(project.id, "fp-1", IssueStatus::Unresolved)
        .await
        .unwrap();
    let service = IssueService::new(test_db.db.clone());

    let change = service
        .change_status(
            issue.id,
            IssueStatus::Resolved,
            user.id,
            Some("fixed in v2".to_string()),
        )
        .await
        .unwrap();
    assert!(!change.regression);
    assert!(change.notifications.is_empty());
    assert_eq!(change.issue.status, IssueStatus::Resolved);
    assert_eq!(change.resolution.resolved_by, Some(user.id));
    assert_eq!(change.resolution.comment.as_deref(), Some("fixed in v2"));

    let err = service
        .change_status(issue.id, IssueStatus::Resolved, user.id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ErrorTrackingError::InvalidTransition(IssueStatus::Resolved)
    ));

    let err = service
        .change_status(9999, IssueStatus::Resolved, user.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ErrorTrackingError::IssueNotFound(9999)));
}

#[tokio::test]
async fn test_reopening_notifies_every_team_member() {
    let test_db = setup_test_db().await;
    let team = test_db.create_team("core").await.unwrap();
    let project = test_db.create_project("api", Some(team.id)).await.unwrap();
    let alice = test_db.create_user("alice@example.com").await.unwrap();
    let bob = test_db.create_user("bob@example.com").await.unwrap();
    test_db.add_team_member(team.id, alice.id).await.unwrap();
    test_db.add_team_member(team.id, bob.id).await.unwrap();
    let issue = test_db
        .create_issue(project.id, "fp-1", IssueStatus::Resolved)
        .await
        .unwrap();
    let service = IssueService::new(test_db.db.clone());

    let change = service
        .change_status(issue.id, IssueStatus::Unresolved, alice.id, None)
        .await
        .unwrap();
    assert!(change.regression);
    assert_eq!(change.issue.status, IssueStatus::Unresolved);

    let mut recipients: Vec<i32> = change
        .notifications
        .iter()
        .map(|n| n.user_id.unwrap())
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec![alice.id, bob.id]);
    assert!(change
        .notifications
        .iter()
        .all(|n| n.was_reactivated && !n.is_new && n.level == EventLevel::Error));

    let history = service.resolution_history(issue.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolved_by, Some(alice.id));
}

#[tokio::test]
async fn test_teamless_project_reopens_without_recipients() {
    let test_db = setup_test_db().await;
    let user = test_db.create_user("dev@example.com").await.unwrap();
    let orphan = test_db.create_project("orphan", None).await.unwrap();
    let issue = test_db
        .create_issue(orphan.id, "fp-1", IssueStatus::Resolved)
        .await
        .unwrap();
    let service = IssueService::new(test_db.db.clone());

    let change = service
        .change_status(issue.id, IssueStatus::Unresolved, user.id, None)
        .await
        .unwrap();
    assert!(change.regression);
    assert_eq!(change.issue.status, IssueStatus::Unresolved);
    assert!(change.notifications.is_empty());
    assert!(
        notifications_queue::find_by_issue_id(test_db.db.as_ref(), issue.id)
            .await
            .unwrap()
            .is_empty()
    );

    let history = service.resolution_history(issue.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].resolved_by, Some(user.id));
}

#[tokio::test]
async fn test_unknown_user_cannot_change_teamless_project() {
    let test_db = setup_test_db().await;
    let orphan = test_db.create_project("orphan", None).await.unwrap();
    let issue = test_db
        .create_issue(orphan.id, "fp-1", IssueStatus::Resolved)
        .await
        .unwrap();
    let service = IssueService::new(test_db.db.clone());

    let err = service
        .change_status(issue.id, IssueStatus::Unresolved, 9999, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ErrorTrackingError::PermissionDenied { .. }));
}

#[tokio::test]
async fn test_regression_fan_out_is_all_or_nothing() {
    let test_db = setup_test_db().await;
    let team = test_db.create_team("core").await.unwrap();
    let project = test_db.create_project("api", Some(team.id)).await.unwrap();
    let user = test_db.create_user("dev@example.com").await.unwrap();
    test_db.add_team_member(team.id, user.id).await.unwrap();
    let issue = test_db
        .create_issue(project.id, "fp-1", IssueStatus::Resolved)
        .await
        .unwrap();
    let service = IssueService::new(test_db.db.clone());

    // Make every outbox insert fail
    test_db.execute_sql("DROP TABLE notifications").await.unwrap();

    let err = service
        .change_status(issue.id, IssueStatus::Unresolved, user.id, None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let unchanged = issues::Entity::find_by_id(issue.id)
        .one(test_db.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.status, IssueStatus::Resolved);
    assert!(service.resolution_history(issue.id).await.unwrap().is_empty());
}
