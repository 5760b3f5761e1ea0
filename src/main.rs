use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backfill;
mod cli;
mod config;
mod data;
mod db;
mod health;
mod outcomes;
mod registry;

use cli::Cli;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load()?;

    // Initialize tracing with structured JSON logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "TickerPulse starting up");

    // Initialize database
    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;
    db.health_check().await?;

    info!("Database initialized successfully");

    // Execute CLI command with database pool
    cli::run(cli, db.pool, config).await?;

    info!("TickerPulse completed successfully");
    Ok(())
}
