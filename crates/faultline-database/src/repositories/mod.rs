//! Repository contracts consumed by the ingestion and notification pipelines.
//!
//! Each module exposes a trait (the contract the services depend on), a
//! sea-orm backed implementation, and free functions generic over
//! [`sea_orm::ConnectionTrait`] so the issue state machine can compose the
//! same operations inside a single transaction.

mod error;
pub mod issues;
pub mod notification_settings;
pub mod notifications_queue;
pub mod projects;
pub mod resolutions;
pub mod teams;
pub mod users;

pub use error::{RepositoryError, RepositoryResult};
pub use issues::{IssuesRepository, NewIssue, SeaIssuesRepository};
pub use notification_settings::{
    NotificationSettingsRepository, SeaNotificationSettingsRepository, SettingWithRules,
};
pub use notifications_queue::{
    NewNotification, NotificationWithSettings, NotificationsQueueRepository,
    SeaNotificationsQueueRepository,
};
pub use projects::{ProjectsRepository, SeaProjectsRepository};
pub use resolutions::{NewResolution, ResolutionsRepository, SeaResolutionsRepository};
pub use teams::{SeaTeamsRepository, TeamsRepository};
pub use users::{SeaUsersRepository, UsersRepository};
