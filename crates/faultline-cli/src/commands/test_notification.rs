use super::load_config;
use clap::Args;
use colored::Colorize;
use faultline_database::establish_connection;
use faultline_notifications::{
    ChannelRegistry, DispatcherRepositories, NotificationDispatcher, Resilience,
};
use tracing::info;

#[derive(Args)]
pub struct TestNotificationCommand {
    /// Database connection URL
    #[arg(long, env = "FAULTLINE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Id of the notification setting to exercise
    #[arg(long)]
    pub setting_id: i32,
}

impl TestNotificationCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let config = load_config(self.database_url);
            let db = establish_connection(&config.database).await?;

            let dispatcher = NotificationDispatcher::new(
                DispatcherRepositories::sea_orm(db, config.dispatcher.claim_timeout),
                ChannelRegistry::with_defaults()?,
                Resilience::from_config(&config.resilience),
                config.dispatcher.clone(),
            );

            info!(setting_id = self.setting_id, "Sending test notification");
            match dispatcher.send_test_notification(self.setting_id).await {
                Ok(()) => {
                    println!(
                        "{} {}",
                        "✓".bright_green(),
                        format!("Test notification sent for setting {}", self.setting_id)
                            .bright_white()
                    );
                    Ok(())
                }
                Err(e) => {
                    println!("{} {}", "✗".bright_red(), e.to_string().bright_white());
                    Err(e.into())
                }
            }
        })
    }
}
