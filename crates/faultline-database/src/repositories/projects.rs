use super::RepositoryResult;
use async_trait::async_trait;
use faultline_entities::{projects, team_members, users};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use std::sync::Arc;

#[async_trait]
pub trait ProjectsRepository: Send + Sync {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<projects::Model>>;
    /// Projects owned by any team the user belongs to, plus teamless ones
    async fn accessible_project_ids(&self, user_id: i32) -> RepositoryResult<Vec<i32>>;
}

pub async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: i32,
) -> Result<Option<projects::Model>, DbErr> {
    projects::Entity::find_by_id(id).one(conn).await
}

/// Projects owned by a team the user belongs to, plus every teamless
/// project. Unknown users can access nothing.
pub async fn accessible_project_ids<C: ConnectionTrait>(
    conn: &C,
    user_id: i32,
) -> Result<Vec<i32>, DbErr> {
    if users::Entity::find_by_id(user_id).one(conn).await?.is_none() {
        return Ok(Vec::new());
    }

    let team_ids: Vec<i32> = team_members::Entity::find()
        .select_only()
        .column(team_members::Column::TeamId)
        .filter(team_members::Column::UserId.eq(user_id))
        .into_tuple()
        .all(conn)
        .await?;

    let mut reachable = Condition::any().add(projects::Column::TeamId.is_null());
    if !team_ids.is_empty() {
        reachable = reachable.add(projects::Column::TeamId.is_in(team_ids));
    }

    projects::Entity::find()
        .select_only()
        .column(projects::Column::Id)
        .filter(reachable)
        .order_by_asc(projects::Column::Id)
        .into_tuple()
        .all(conn)
        .await
}

pub struct SeaProjectsRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaProjectsRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProjectsRepository for SeaProjectsRepository {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<projects::Model>> {
        Ok(find_by_id(self.db.as_ref(), id).await?)
    }

    async fn accessible_project_ids(&self, user_id: i32) -> RepositoryResult<Vec<i32>> {
        Ok(accessible_project_ids(self.db.as_ref(), user_id).await?)
    }
}
