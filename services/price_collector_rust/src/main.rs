use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use price_collector_rust::collector::{run_bulk_command, run_cycle_command, run_schema_command};
use price_collector_rust::{Cli, Command, CollectorConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let command = Cli::parse().command();
    info!("Starting price_collector_rust: {:?}", command);

    let config = CollectorConfig::from_env()?;
    match command {
        Command::Cycle => run_cycle_command(&config).await,
        Command::Bulk { source, path } => run_bulk_command(&config, &source, &path).await,
        Command::Schema => run_schema_command(&config).await,
    }
}
