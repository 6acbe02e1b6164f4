//! Faultline CLI - single entrypoint for the ingestion and notification pipeline
//!
//! Runs the ingress workers and the notification dispatcher in one process,
//! and exposes maintenance commands for migrations, batch ingestion and
//! channel testing.

mod commands;

use clap::{Parser, Subcommand};
use commands::{IngestCommand, MigrateCommand, ServeCommand, TestNotificationCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FAULTLINE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "FAULTLINE_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run ingress workers and the notification dispatcher
    Serve(ServeCommand),
    /// Apply pending database migrations
    Migrate(MigrateCommand),
    /// Ingest a file of JSON events and exit once processed
    Ingest(IngestCommand),
    /// Send a test message through a stored notification setting
    TestNotification(TestNotificationCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // If RUST_LOG is set it wins; otherwise our crates at the requested level
    // and noisy dependencies at warn
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "faultline={level},\
             faultline_cli={level},\
             faultline_core={level},\
             faultline_database={level},\
             faultline_migrations={level},\
             faultline_queue={level},\
             faultline_error_tracking={level},\
             faultline_notifications={level},\
             sqlx=warn,\
             sea_orm=warn,\
             sea_orm_migration=warn,\
             hyper=warn,\
             reqwest=warn,\
             lettre=warn,\
             redis=warn,\
             rustls=warn",
            level = cli.log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(cmd) => cmd.execute(),
        Commands::Migrate(cmd) => cmd.execute(),
        Commands::Ingest(cmd) => cmd.execute(),
        Commands::TestNotification(cmd) => cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_ingest_arguments() {
        let cli = Cli::try_parse_from([
            "faultline",
            "--log-level",
            "debug",
            "ingest",
            "--project-id",
            "4",
            "--file",
            "events.jsonl",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Ingest(cmd) => {
                assert_eq!(cmd.project_id, 4);
                assert_eq!(cmd.priority, 5);
                assert_eq!(cmd.file, std::path::PathBuf::from("events.jsonl"));
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn test_rejects_out_of_range_priority() {
        let result = Cli::try_parse_from([
            "faultline",
            "ingest",
            "--project-id",
            "4",
            "--priority",
            "42",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_test_notification_requires_setting_id() {
        assert!(Cli::try_parse_from(["faultline", "test-notification"]).is_err());
    }
}
