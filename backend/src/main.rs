//! Volume Keeper - Main Entry Point

use clap::Parser;

use volume_keeper_backend::{cli, config::Config, error::Result, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = cli::Cli::parse();
    let config = Config::from_env()?;
    telemetry::init_tracing(&config.log_level);
    tracing::info!("Starting Volume Keeper");

    cli::run(cli, config).await
}
