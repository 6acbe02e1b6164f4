use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: i32) -> Self {
        RepositoryError::NotFound { entity, id }
    }
}
