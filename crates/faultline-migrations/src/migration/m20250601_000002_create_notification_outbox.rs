use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========================================
        // NOTIFICATION_SETTINGS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(NotificationSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationSettings::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::ProjectId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::NotificationType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::Config)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(NotificationSettings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_settings_project")
                            .from(NotificationSettings::Table, NotificationSettings::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_settings_project_id")
                    .table(NotificationSettings::Table)
                    .col(NotificationSettings::ProjectId)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // NOTIFICATION_RULES TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(NotificationRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationRules::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(NotificationRules::SettingId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationRules::Position)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(NotificationRules::EventLevel).string().null())
                    .col(ColumnDef::new(NotificationRules::Fingerprint).string().null())
                    .col(
                        ColumnDef::new(NotificationRules::IsNewError)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(NotificationRules::IsRegression)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_rules_setting")
                            .from(NotificationRules::Table, NotificationRules::SettingId)
                            .to(NotificationSettings::Table, NotificationSettings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_rules_setting_id")
                    .table(NotificationRules::Table)
                    .col(NotificationRules::SettingId)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // NOTIFICATIONS TABLE (outbox)
        // ========================================
        // No foreign keys to issues/projects: the dispatcher must be able to
        // observe rows whose issue or project has since been deleted.
        manager
            .create_table(
                Table::create()
                    .table(Notifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Notifications::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Notifications::ProjectId).integer().not_null())
                    .col(ColumnDef::new(Notifications::IssueId).integer().not_null())
                    .col(ColumnDef::new(Notifications::UserId).integer().null())
                    .col(ColumnDef::new(Notifications::Level).string().not_null())
                    .col(
                        ColumnDef::new(Notifications::IsNew)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Notifications::WasReactivated)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Notifications::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Notifications::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Notifications::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Notifications::FailReason).text().null())
                    .col(
                        ColumnDef::new(Notifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Notifications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_status_id")
                    .table(Notifications::Table)
                    .col(Notifications::Status)
                    .col(Notifications::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_issue_id")
                    .table(Notifications::Table)
                    .col(Notifications::IssueId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Notifications::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(NotificationRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(NotificationSettings::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum NotificationSettings {
    Table,
    Id,
    ProjectId,
    NotificationType,
    Config,
    Enabled,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum NotificationRules {
    Table,
    Id,
    SettingId,
    Position,
    EventLevel,
    Fingerprint,
    IsNewError,
    IsRegression,
}

#[derive(DeriveIden)]
enum Notifications {
    Table,
    Id,
    ProjectId,
    IssueId,
    UserId,
    Level,
    IsNew,
    WasReactivated,
    Status,
    ClaimedAt,
    SentAt,
    FailReason,
    CreatedAt,
    UpdatedAt,
}
