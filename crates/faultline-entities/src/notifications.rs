use crate::types::{EventLevel, NotificationStatus};
use async_trait::async_trait;
use faultline_core::DBDateTime;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

/// Outbox row. Carries only the facts needed to decide whether to notify;
/// message content is rendered at send time from the live issue and project.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,
    pub issue_id: i32,
    /// Recipient for regression fan-out rows created by a status change
    pub user_id: Option<i32>,
    pub level: EventLevel,
    pub is_new: bool,
    pub was_reactivated: bool,
    pub status: NotificationStatus,
    pub claimed_at: Option<DBDateTime>,
    pub sent_at: Option<DBDateTime>,
    #[sea_orm(column_type = "Text", nullable)]
    pub fail_reason: Option<String>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.status.is_not_set() {
                self.status = Set(NotificationStatus::Pending);
            }
        }
        self.updated_at = Set(now);

        Ok(self)
    }
}
