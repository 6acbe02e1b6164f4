use crate::types::EventLevel;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Predicate attached to a notification setting. Rules are ordered by `position`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub setting_id: i32,
    pub position: i32,
    /// `None` matches every level
    pub event_level: Option<EventLevel>,
    /// `None` matches every fingerprint
    pub fingerprint: Option<String>,
    pub is_new_error: bool,
    pub is_regression: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::notification_settings::Entity",
        from = "Column::SettingId",
        to = "super::notification_settings::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    NotificationSettings,
}

impl Related<super::notification_settings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NotificationSettings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
