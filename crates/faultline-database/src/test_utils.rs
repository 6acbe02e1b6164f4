//! Test utilities for database integration tests
//!
//! `TestDatabase::new()` gives every test its own migrated in-memory SQLite
//! database. `TestDatabase::postgres()` starts a dedicated PostgreSQL
//! container for tests that depend on Postgres-only behaviour (row locking,
//! isolation levels); those tests need Docker and are `#[ignore]`d by default.

use crate::repositories::{NewNotification, SettingWithRules};
use crate::DbConnection;
use chrono::Utc;
use faultline_entities::types::{EventLevel, EventSource, IssueStatus, NotificationType};
use faultline_entities::{
    issues, notification_rules, notification_settings, notifications, projects, team_members,
    teams, users,
};
use faultline_migrations::Migrator;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};

/// Rule definition used when seeding notification settings
#[derive(Debug, Clone, Default)]
pub struct RuleSpec {
    pub event_level: Option<EventLevel>,
    pub fingerprint: Option<String>,
    pub is_new_error: bool,
    pub is_regression: bool,
}

impl RuleSpec {
    pub fn new_errors() -> Self {
        Self {
            is_new_error: true,
            ..Default::default()
        }
    }

    pub fn regressions() -> Self {
        Self {
            is_regression: true,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.event_level = Some(level);
        self
    }
}

/// Migrated test database
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
    pub database_url: String,
    /// Keeps the Postgres container alive for the lifetime of the test
    #[allow(dead_code)]
    dedicated_container: Option<ContainerAsync<GenericImage>>,
}

impl TestDatabase {
    /// Fresh in-memory SQLite database with all migrations applied
    pub async fn new() -> anyhow::Result<Self> {
        let database_url = "sqlite::memory:".to_string();

        // An in-memory database lives and dies with its connection, so the
        // pool must hold exactly one.
        let mut opt = ConnectOptions::new(database_url.clone());
        opt.max_connections(1)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(3600))
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Migrator::up(&db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(Self {
            db: Arc::new(db),
            database_url,
            dedicated_container: None,
        })
    }

    /// Dedicated PostgreSQL container with all migrations applied
    pub async fn postgres() -> anyhow::Result<Self> {
        let db_name = "faultline_test";
        let username = "test_user";
        let password = "test_password";

        let postgres_container = GenericImage::new("postgres", "17-alpine")
            .with_env_var("POSTGRES_DB", db_name)
            .with_env_var("POSTGRES_USER", username)
            .with_env_var("POSTGRES_PASSWORD", password)
            .with_env_var("POSTGRES_HOST_AUTH_METHOD", "trust")
            .start()
            .await?;

        let port = postgres_container.get_host_port_ipv4(5432).await?;
        let database_url = format!(
            "postgresql://{}:{}@localhost:{}/{}",
            username, password, port, db_name
        );

        let db = Self::connect_with_retry(&database_url, 20).await?;
        Migrator::up(&db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(Self {
            db: Arc::new(db),
            database_url,
            dedicated_container: Some(postgres_container),
        })
    }

    /// Connect to database with retry logic
    async fn connect_with_retry(
        database_url: &str,
        max_retries: u32,
    ) -> anyhow::Result<DbConnection> {
        let mut retries = max_retries;

        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(5)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        loop {
            match Database::connect(opt.clone()).await {
                Ok(db) => {
                    let test =
                        Statement::from_string(DatabaseBackend::Postgres, "SELECT 1".to_owned());
                    match db.execute(test).await {
                        Ok(_) => return Ok(db),
                        Err(e) if retries > 0 => {
                            eprintln!(
                                "Database connected but test query failed (retries left: {}): {}",
                                retries, e
                            );
                        }
                        Err(e) => {
                            return Err(anyhow::anyhow!(
                                "Database connected but not responsive: {}",
                                e
                            ));
                        }
                    }
                }
                Err(e) if retries > 0 => {
                    eprintln!(
                        "Failed to connect to database (retries left: {}): {}",
                        retries, e
                    );
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("Failed to connect to database: {}", e));
                }
            }

            retries -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Execute raw SQL for testing
    pub async fn execute_sql(&self, sql: &str) -> anyhow::Result<ExecResult> {
        let statement = Statement::from_string(self.db.get_database_backend(), sql.to_owned());
        Ok(self.db.execute(statement).await?)
    }

    // ========================================
    // Fixtures
    // ========================================

    pub async fn create_user(&self, email: &str) -> anyhow::Result<users::Model> {
        let user = users::ActiveModel {
            email: Set(email.to_string()),
            name: Set(email.split('@').next().unwrap_or(email).to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(user)
    }

    pub async fn create_team(&self, name: &str) -> anyhow::Result<teams::Model> {
        let team = teams::ActiveModel {
            name: Set(name.to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(team)
    }

    pub async fn add_team_member(
        &self,
        team_id: i32,
        user_id: i32,
    ) -> anyhow::Result<team_members::Model> {
        let member = team_members::ActiveModel {
            team_id: Set(team_id),
            user_id: Set(user_id),
            role: Set("member".to_string()),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(member)
    }

    pub async fn create_project(
        &self,
        slug: &str,
        team_id: Option<i32>,
    ) -> anyhow::Result<projects::Model> {
        let project = projects::ActiveModel {
            name: Set(slug.to_string()),
            slug: Set(slug.to_string()),
            team_id: Set(team_id),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(project)
    }

    pub async fn create_issue(
        &self,
        project_id: i32,
        fingerprint: &str,
        status: IssueStatus,
    ) -> anyhow::Result<issues::Model> {
        let now = Utc::now();
        let issue = issues::ActiveModel {
            project_id: Set(project_id),
            fingerprint: Set(fingerprint.to_string()),
            source: Set(EventSource::Event),
            status: Set(status),
            title: Set(format!("issue {}", fingerprint)),
            level: Set(EventLevel::Error),
            platform: Set("rust".to_string()),
            first_seen: Set(now),
            last_seen: Set(now),
            total_events: Set(1),
            last_notification: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(issue)
    }

    pub async fn create_setting(
        &self,
        project_id: i32,
        notification_type: NotificationType,
        config: serde_json::Value,
        enabled: bool,
        rules: Vec<RuleSpec>,
    ) -> anyhow::Result<SettingWithRules> {
        let setting = notification_settings::ActiveModel {
            project_id: Set(project_id),
            notification_type: Set(notification_type),
            config: Set(config.to_string()),
            enabled: Set(enabled),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;

        let mut created = Vec::with_capacity(rules.len());
        for (position, rule) in rules.into_iter().enumerate() {
            let model = notification_rules::ActiveModel {
                setting_id: Set(setting.id),
                position: Set(position as i32),
                event_level: Set(rule.event_level),
                fingerprint: Set(rule.fingerprint),
                is_new_error: Set(rule.is_new_error),
                is_regression: Set(rule.is_regression),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await?;
            created.push(model);
        }

        Ok(SettingWithRules {
            setting,
            rules: created,
        })
    }

    pub async fn create_notification(
        &self,
        new: NewNotification,
    ) -> anyhow::Result<notifications::Model> {
        Ok(crate::repositories::notifications_queue::enqueue(self.db.as_ref(), new).await?)
    }
}
