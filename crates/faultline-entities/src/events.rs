use crate::types::{EventLevel, EventSource};
use faultline_core::DBDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub issue_id: i32,
    pub project_id: i32,

    // Identification
    pub event_id: String,
    pub group_hash: String,
    pub timestamp: DBDateTime,

    pub level: EventLevel,
    pub source: EventSource,
    pub platform: String,
    pub message: String,
    pub environment: String,
    pub release: String,
    pub server_name: String,

    /// JSON object of string tags
    #[sea_orm(column_type = "Text")]
    pub tags: String,

    // Exception triple
    pub exception_type: Option<String>,
    pub exception_value: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub stacktrace: Option<String>,

    /// JSON object holding the request/user/runtime/os/browser/device contexts
    #[sea_orm(column_type = "Text")]
    pub contexts: String,

    /// The original payload, verbatim
    #[sea_orm(column_type = "Text")]
    pub payload: String,

    pub created_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::issues::Entity",
        from = "Column::IssueId",
        to = "super::issues::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Issues,
}

impl Related<super::issues::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Issues.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
