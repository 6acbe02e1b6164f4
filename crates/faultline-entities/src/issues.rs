use crate::types::{EventLevel, EventSource, IssueStatus};
use faultline_core::DBDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Aggregate of every event sharing a fingerprint within a project.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "issues")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,

    // Grouping
    pub fingerprint: String,
    pub source: EventSource,

    // Status management
    pub status: IssueStatus,

    // Display
    pub title: String,
    pub level: EventLevel,
    pub platform: String,

    // Timestamps and metrics
    pub first_seen: DBDateTime,
    pub last_seen: DBDateTime,
    pub total_events: i64,
    pub last_notification: Option<DBDateTime>,

    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Projects,
    #[sea_orm(has_many = "super::events::Entity")]
    Events,
    #[sea_orm(has_many = "super::resolutions::Entity")]
    Resolutions,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl Related<super::events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl Related<super::resolutions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Resolutions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
