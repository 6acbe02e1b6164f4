use super::RepositoryResult;
use async_trait::async_trait;
use faultline_entities::{team_members, users};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait,
};
use std::sync::Arc;

#[async_trait]
pub trait TeamsRepository: Send + Sync {
    async fn get_members(&self, team_id: i32) -> RepositoryResult<Vec<users::Model>>;
}

pub async fn find_members<C: ConnectionTrait>(
    conn: &C,
    team_id: i32,
) -> Result<Vec<users::Model>, DbErr> {
    users::Entity::find()
        .join(JoinType::InnerJoin, users::Relation::TeamMembers.def())
        .filter(team_members::Column::TeamId.eq(team_id))
        .order_by_asc(users::Column::Id)
        .all(conn)
        .await
}

pub struct SeaTeamsRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaTeamsRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TeamsRepository for SeaTeamsRepository {
    async fn get_members(&self, team_id: i32) -> RepositoryResult<Vec<users::Model>> {
        Ok(find_members(self.db.as_ref(), team_id).await?)
    }
}
