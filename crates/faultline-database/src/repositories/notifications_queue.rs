//! Notification outbox.
//!
//! Rows move `pending -> processing -> sent | failed | skipped`. Taking a
//! batch claims the rows by moving them to `processing` with `claimed_at`
//! set; rows left in `processing` beyond the claim timeout (a dispatcher that
//! died mid-batch) become eligible again, so delivery is at-least-once.

use super::notification_settings::{self, SettingWithRules};
use super::{issues, RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::Utc;
use faultline_core::UtcDateTime;
use faultline_entities::notifications;
use faultline_entities::types::{EventLevel, NotificationStatus};
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub project_id: i32,
    pub issue_id: i32,
    pub user_id: Option<i32>,
    pub level: EventLevel,
    pub is_new: bool,
    pub was_reactivated: bool,
}

/// A claimed outbox row plus every setting configured for its project
#[derive(Debug, Clone)]
pub struct NotificationWithSettings {
    pub notification: notifications::Model,
    pub settings: Vec<SettingWithRules>,
}

#[async_trait]
pub trait NotificationsQueueRepository: Send + Sync {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<notifications::Model>>;
    /// Claim up to `limit` pending rows, oldest first
    async fn take_pending(&self, limit: u64) -> RepositoryResult<Vec<NotificationWithSettings>>;
    /// Restamp `claimed_at` on a row still in `processing`, restarting its claim timeout
    async fn renew_claim(&self, id: i32) -> RepositoryResult<()>;
    /// Mark delivered and stamp the issue's notified marker in the same transaction
    async fn mark_as_sent(&self, id: i32) -> RepositoryResult<()>;
    async fn mark_as_failed(&self, id: i32, reason: &str) -> RepositoryResult<()>;
    async fn mark_as_skipped(&self, id: i32, reason: &str) -> RepositoryResult<()>;
}

/// Enqueue a pending notification
pub async fn enqueue<C: ConnectionTrait>(
    conn: &C,
    new: NewNotification,
) -> Result<notifications::Model, DbErr> {
    notifications::ActiveModel {
        project_id: Set(new.project_id),
        issue_id: Set(new.issue_id),
        user_id: Set(new.user_id),
        level: Set(new.level),
        is_new: Set(new.is_new),
        was_reactivated: Set(new.was_reactivated),
        status: Set(NotificationStatus::Pending),
        claimed_at: Set(None),
        sent_at: Set(None),
        fail_reason: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await
}

pub async fn find_by_issue_id<C: ConnectionTrait>(
    conn: &C,
    issue_id: i32,
) -> Result<Vec<notifications::Model>, DbErr> {
    notifications::Entity::find()
        .filter(notifications::Column::IssueId.eq(issue_id))
        .order_by_asc(notifications::Column::Id)
        .all(conn)
        .await
}

pub struct SeaNotificationsQueueRepository {
    db: Arc<DatabaseConnection>,
    claim_timeout: Duration,
}

impl SeaNotificationsQueueRepository {
    pub fn new(db: Arc<DatabaseConnection>, claim_timeout: Duration) -> Self {
        Self { db, claim_timeout }
    }

    fn stale_before(&self, now: UtcDateTime) -> UtcDateTime {
        match chrono::Duration::from_std(self.claim_timeout) {
            Ok(timeout) => now - timeout,
            Err(_) => now,
        }
    }

    async fn finish(
        &self,
        id: i32,
        status: NotificationStatus,
        reason: Option<&str>,
    ) -> RepositoryResult<()> {
        let now = Utc::now();
        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::Status, Expr::value(status.as_str()))
            .col_expr(
                notifications::Column::FailReason,
                Expr::value(reason.map(str::to_string)),
            )
            .col_expr(notifications::Column::UpdatedAt, Expr::value(now))
            .filter(notifications::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("notification", id));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationsQueueRepository for SeaNotificationsQueueRepository {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<notifications::Model>> {
        Ok(notifications::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    async fn take_pending(&self, limit: u64) -> RepositoryResult<Vec<NotificationWithSettings>> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let claimable = Condition::any()
            .add(notifications::Column::Status.eq(NotificationStatus::Pending.as_str()))
            .add(
                Condition::all()
                    .add(notifications::Column::Status.eq(NotificationStatus::Processing.as_str()))
                    .add(notifications::Column::ClaimedAt.lt(self.stale_before(now))),
            );

        let mut query = notifications::Entity::find()
            .filter(claimable)
            .order_by_asc(notifications::Column::Id)
            .limit(limit);

        // Concurrent dispatchers skip each other's rows instead of blocking
        if txn.get_database_backend() == DatabaseBackend::Postgres {
            query = query.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
        }

        let rows = query.all(&txn).await?;
        if rows.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<i32> = rows.iter().map(|n| n.id).collect();
        notifications::Entity::update_many()
            .col_expr(
                notifications::Column::Status,
                Expr::value(NotificationStatus::Processing.as_str()),
            )
            .col_expr(notifications::Column::ClaimedAt, Expr::value(Some(now)))
            .col_expr(notifications::Column::UpdatedAt, Expr::value(now))
            .filter(notifications::Column::Id.is_in(ids))
            .exec(&txn)
            .await?;

        let project_ids: BTreeSet<i32> = rows.iter().map(|n| n.project_id).collect();
        let settings =
            notification_settings::find_for_projects(&txn, project_ids.into_iter().collect())
                .await?;

        txn.commit().await?;

        let mut by_project: HashMap<i32, Vec<SettingWithRules>> = HashMap::new();
        for setting in settings {
            by_project
                .entry(setting.setting.project_id)
                .or_default()
                .push(setting);
        }

        let batch: Vec<NotificationWithSettings> = rows
            .into_iter()
            .map(|mut notification| {
                notification.status = NotificationStatus::Processing;
                notification.claimed_at = Some(now);
                let settings = by_project
                    .get(&notification.project_id)
                    .cloned()
                    .unwrap_or_default();
                NotificationWithSettings {
                    notification,
                    settings,
                }
            })
            .collect();

        debug!(count = batch.len(), "Claimed pending notifications");
        Ok(batch)
    }

    async fn renew_claim(&self, id: i32) -> RepositoryResult<()> {
        let now = Utc::now();
        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::ClaimedAt, Expr::value(Some(now)))
            .col_expr(notifications::Column::UpdatedAt, Expr::value(now))
            .filter(notifications::Column::Id.eq(id))
            .filter(notifications::Column::Status.eq(NotificationStatus::Processing.as_str()))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("claimed notification", id));
        }
        Ok(())
    }

    async fn mark_as_sent(&self, id: i32) -> RepositoryResult<()> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let notification = notifications::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| RepositoryError::not_found("notification", id))?;

        notifications::Entity::update_many()
            .col_expr(
                notifications::Column::Status,
                Expr::value(NotificationStatus::Sent.as_str()),
            )
            .col_expr(notifications::Column::SentAt, Expr::value(Some(now)))
            .col_expr(
                notifications::Column::FailReason,
                Expr::value(Option::<String>::None),
            )
            .col_expr(notifications::Column::UpdatedAt, Expr::value(now))
            .filter(notifications::Column::Id.eq(id))
            .exec(&txn)
            .await?;

        issues::mark_as_notified(&txn, notification.issue_id, now).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn mark_as_failed(&self, id: i32, reason: &str) -> RepositoryResult<()> {
        self.finish(id, NotificationStatus::Failed, Some(reason))
            .await
    }

    async fn mark_as_skipped(&self, id: i32, reason: &str) -> RepositoryResult<()> {
        self.finish(id, NotificationStatus::Skipped, Some(reason))
            .await
    }
}
