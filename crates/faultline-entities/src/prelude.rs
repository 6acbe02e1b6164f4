pub use super::events::Entity as Events;
pub use super::issues::Entity as Issues;
pub use super::notification_rules::Entity as NotificationRules;
pub use super::notification_settings::Entity as NotificationSettings;
pub use super::notifications::Entity as Notifications;
pub use super::projects::Entity as Projects;
pub use super::resolutions::Entity as Resolutions;
pub use super::team_members::Entity as TeamMembers;
pub use super::teams::Entity as Teams;
pub use super::users::Entity as Users;
