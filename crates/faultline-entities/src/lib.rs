pub mod types;

// Tenancy
pub mod projects;
pub mod teams;
pub mod team_members;
pub mod users;

// Error tracking entities
pub mod issues;
pub mod events;
pub mod resolutions;

// Notification entities
pub mod notification_settings;
pub mod notification_rules;
pub mod notifications;

pub mod prelude;
