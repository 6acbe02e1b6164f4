use super::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::Utc;
use faultline_core::UtcDateTime;
use faultline_entities::issues;
use faultline_entities::types::{EventLevel, EventSource, IssueStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set,
};
use std::sync::Arc;

/// Fields for the first occurrence of a fingerprint
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub project_id: i32,
    pub fingerprint: String,
    pub source: EventSource,
    pub title: String,
    pub level: EventLevel,
    pub platform: String,
    pub seen_at: UtcDateTime,
}

#[async_trait]
pub trait IssuesRepository: Send + Sync {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<issues::Model>>;
    async fn update_status(&self, id: i32, status: IssueStatus) -> RepositoryResult<()>;
    async fn mark_as_notified(&self, id: i32, at: UtcDateTime) -> RepositoryResult<()>;
}

pub async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: i32,
) -> Result<Option<issues::Model>, DbErr> {
    issues::Entity::find_by_id(id).one(conn).await
}

pub async fn find_by_fingerprint<C: ConnectionTrait>(
    conn: &C,
    project_id: i32,
    fingerprint: &str,
) -> Result<Option<issues::Model>, DbErr> {
    issues::Entity::find()
        .filter(issues::Column::ProjectId.eq(project_id))
        .filter(issues::Column::Fingerprint.eq(fingerprint))
        .one(conn)
        .await
}

/// Create an unresolved issue with `total_events = 1`
pub async fn insert<C: ConnectionTrait>(conn: &C, new: NewIssue) -> Result<issues::Model, DbErr> {
    let now = Utc::now();
    issues::ActiveModel {
        project_id: Set(new.project_id),
        fingerprint: Set(new.fingerprint),
        source: Set(new.source),
        status: Set(IssueStatus::Unresolved),
        title: Set(new.title),
        level: Set(new.level),
        platform: Set(new.platform),
        first_seen: Set(new.seen_at),
        last_seen: Set(new.seen_at),
        total_events: Set(1),
        last_notification: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
}

/// Count one more occurrence against an existing issue.
///
/// The counter is incremented in SQL so concurrent writers never lose an
/// update. `last_seen` only moves forward; `reopen` flips the status back to
/// unresolved.
pub async fn record_occurrence<C: ConnectionTrait>(
    conn: &C,
    issue: &issues::Model,
    seen_at: UtcDateTime,
    reopen: bool,
) -> Result<issues::Model, DbErr> {
    let last_seen = issue.last_seen.max(seen_at);
    let mut update = issues::Entity::update_many()
        .col_expr(
            issues::Column::TotalEvents,
            Expr::col(issues::Column::TotalEvents).add(1),
        )
        .col_expr(issues::Column::LastSeen, Expr::value(last_seen))
        .col_expr(issues::Column::UpdatedAt, Expr::value(Utc::now()));

    if reopen {
        update = update.col_expr(
            issues::Column::Status,
            Expr::value(IssueStatus::Unresolved.as_str()),
        );
    }

    update
        .filter(issues::Column::Id.eq(issue.id))
        .exec(conn)
        .await?;

    find_by_id(conn, issue.id)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("issue {}", issue.id)))
}

pub async fn update_status<C: ConnectionTrait>(
    conn: &C,
    id: i32,
    status: IssueStatus,
) -> RepositoryResult<()> {
    let result = issues::Entity::update_many()
        .col_expr(issues::Column::Status, Expr::value(status.as_str()))
        .col_expr(issues::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(issues::Column::Id.eq(id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(RepositoryError::not_found("issue", id));
    }
    Ok(())
}

pub async fn mark_as_notified<C: ConnectionTrait>(
    conn: &C,
    id: i32,
    at: UtcDateTime,
) -> Result<(), DbErr> {
    issues::Entity::update_many()
        .col_expr(issues::Column::LastNotification, Expr::value(Some(at)))
        .filter(issues::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(())
}

pub struct SeaIssuesRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaIssuesRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IssuesRepository for SeaIssuesRepository {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<issues::Model>> {
        Ok(find_by_id(self.db.as_ref(), id).await?)
    }

    async fn update_status(&self, id: i32, status: IssueStatus) -> RepositoryResult<()> {
        update_status(self.db.as_ref(), id, status).await
    }

    async fn mark_as_notified(&self, id: i32, at: UtcDateTime) -> RepositoryResult<()> {
        Ok(mark_as_notified(self.db.as_ref(), id, at).await?)
    }
}
