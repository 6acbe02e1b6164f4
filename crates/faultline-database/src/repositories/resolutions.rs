use super::RepositoryResult;
use async_trait::async_trait;
use chrono::Utc;
use faultline_entities::resolutions;
use faultline_entities::types::IssueStatus;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct NewResolution {
    pub issue_id: i32,
    pub status: IssueStatus,
    /// `None` records a system transition
    pub resolved_by: Option<i32>,
    pub comment: Option<String>,
}

#[async_trait]
pub trait ResolutionsRepository: Send + Sync {
    async fn create(&self, resolution: NewResolution) -> RepositoryResult<resolutions::Model>;
    /// Audit trail for an issue, oldest first
    async fn get_by_issue_id(&self, issue_id: i32) -> RepositoryResult<Vec<resolutions::Model>>;
}

pub async fn create<C: ConnectionTrait>(
    conn: &C,
    resolution: NewResolution,
) -> Result<resolutions::Model, DbErr> {
    resolutions::ActiveModel {
        issue_id: Set(resolution.issue_id),
        status: Set(resolution.status),
        resolved_by: Set(resolution.resolved_by),
        resolved_at: Set(Utc::now()),
        comment: Set(resolution.comment),
        ..Default::default()
    }
    .insert(conn)
    .await
}

pub async fn find_by_issue_id<C: ConnectionTrait>(
    conn: &C,
    issue_id: i32,
) -> Result<Vec<resolutions::Model>, DbErr> {
    resolutions::Entity::find()
        .filter(resolutions::Column::IssueId.eq(issue_id))
        .order_by_asc(resolutions::Column::ResolvedAt)
        .order_by_asc(resolutions::Column::Id)
        .all(conn)
        .await
}

pub struct SeaResolutionsRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaResolutionsRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResolutionsRepository for SeaResolutionsRepository {
    async fn create(&self, resolution: NewResolution) -> RepositoryResult<resolutions::Model> {
        Ok(create(self.db.as_ref(), resolution).await?)
    }

    async fn get_by_issue_id(&self, issue_id: i32) -> RepositoryResult<Vec<resolutions::Model>> {
        Ok(find_by_issue_id(self.db.as_ref(), issue_id).await?)
    }
}
