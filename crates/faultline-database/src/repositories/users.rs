use super::RepositoryResult;
use async_trait::async_trait;
use faultline_entities::users;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait};
use std::sync::Arc;

#[async_trait]
pub trait UsersRepository: Send + Sync {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<users::Model>>;
}

pub async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: i32,
) -> Result<Option<users::Model>, DbErr> {
    users::Entity::find_by_id(id).one(conn).await
}

pub struct SeaUsersRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaUsersRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsersRepository for SeaUsersRepository {
    async fn get_by_id(&self, id: i32) -> RepositoryResult<Option<users::Model>> {
        Ok(find_by_id(self.db.as_ref(), id).await?)
    }
}
