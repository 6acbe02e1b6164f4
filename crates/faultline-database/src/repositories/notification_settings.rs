use super::RepositoryResult;
use async_trait::async_trait;
use faultline_entities::{notification_rules, notification_settings};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
};
use serde_json::Value;
use std::sync::Arc;

/// A notification setting together with its rules, ordered by position
#[derive(Debug, Clone, PartialEq)]
pub struct SettingWithRules {
    pub setting: notification_settings::Model,
    pub rules: Vec<notification_rules::Model>,
}

impl SettingWithRules {
    pub fn config(&self) -> Value {
        self.setting.config_json()
    }
}

#[async_trait]
pub trait NotificationSettingsRepository: Send + Sync {
    async fn get_setting_by_id(&self, id: i32) -> RepositoryResult<Option<SettingWithRules>>;
    async fn list_settings(&self, project_id: i32) -> RepositoryResult<Vec<SettingWithRules>>;
}

fn assemble(
    rows: Vec<(notification_settings::Model, Vec<notification_rules::Model>)>,
) -> Vec<SettingWithRules> {
    rows.into_iter()
        .map(|(setting, mut rules)| {
            rules.sort_by_key(|r| (r.position, r.id));
            SettingWithRules { setting, rules }
        })
        .collect()
}

pub async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: i32,
) -> Result<Option<SettingWithRules>, DbErr> {
    let rows = notification_settings::Entity::find_by_id(id)
        .find_with_related(notification_rules::Entity)
        .all(conn)
        .await?;
    Ok(assemble(rows).into_iter().next())
}

/// All settings for the given projects, enabled or not
pub async fn find_for_projects<C: ConnectionTrait>(
    conn: &C,
    project_ids: Vec<i32>,
) -> Result<Vec<SettingWithRules>, DbErr> {
    if project_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = notification_settings::Entity::find()
        .filter(notification_settings::Column::ProjectId.is_in(project_ids))
        .order_by_asc(notification_settings::Column::Id)
        .find_with_related(notification_rules::Entity)
        .all(conn)
        .await?;
    Ok(assemble(rows))
}

pub struct SeaNotificationSettingsRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaNotificationSettingsRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationSettingsRepository for SeaNotificationSettingsRepository {
    async fn get_setting_by_id(&self, id: i32) -> RepositoryResult<Option<SettingWithRules>> {
        Ok(find_by_id(self.db.as_ref(), id).await?)
    }

    async fn list_settings(&self, project_id: i32) -> RepositoryResult<Vec<SettingWithRules>> {
        Ok(find_for_projects(self.db.as_ref(), vec![project_id]).await?)
    }
}
