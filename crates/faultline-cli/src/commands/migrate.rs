use super::load_config;
use clap::Args;
use colored::Colorize;
use faultline_database::establish_connection;
use tracing::info;

#[derive(Args)]
pub struct MigrateCommand {
    /// Database connection URL
    #[arg(long, env = "FAULTLINE_DATABASE_URL")]
    pub database_url: Option<String>,
}

impl MigrateCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let config = load_config(self.database_url);
            // Connecting applies every pending migration
            establish_connection(&config.database).await?;
            info!("Database schema is up to date");
            println!("{}", "Migrations applied".bright_green());
            Ok(())
        })
    }
}
