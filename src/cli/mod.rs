use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "tickerpulse",
    about = "Market data resilience and prediction outcome engine",
    version = "0.1.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full sweep: register symbols from recent predictions,
    /// backfill missing prices, then compute outcomes
    AutoPipeline {
        /// How many days of predictions and prices to look back over
        #[arg(long, default_value_t = 30)]
        days_back: u32,

        /// Maximum predictions to process in the outcome sweep
        #[arg(long, default_value_t = 500)]
        limit: i64,
    },

    /// Backfill daily price history only
    BackfillPrices {
        /// Symbols to backfill (comma separated); defaults to all active
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Trailing window of days to cover
        #[arg(long, default_value_t = 90)]
        days_back: u32,
    },

    /// Check provider reachability and price-data freshness
    HealthCheck {
        /// Probe providers only
        #[arg(long)]
        providers: bool,

        /// Check data freshness only
        #[arg(long)]
        freshness: bool,

        /// Exit non-zero when unhealthy (for external alerting)
        #[arg(long)]
        alert: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List ticker registry entries and lifecycle stats
    TickerRegistry {
        /// Filter: active, inactive, invalid, or all
        #[arg(long, default_value = "all")]
        status: String,
    },

    /// Register ticker symbols manually
    RegisterTickers {
        /// Symbols to register
        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// Run database migrations
    Migrate,
}

/// Execute CLI command with database pool
pub async fn run(cli: Cli, pool: PgPool, config: Config) -> Result<()> {
    match cli.command {
        Commands::AutoPipeline { days_back, limit } => {
            info!("Running auto pipeline (days_back={}, limit={})", days_back, limit);
            commands::auto_pipeline(pool, config, days_back, limit).await?;
        }
        Commands::BackfillPrices { symbols, days_back } => {
            info!("Backfilling prices (days_back={})", days_back);
            commands::backfill_prices(pool, config, symbols, days_back).await?;
        }
        Commands::HealthCheck {
            providers,
            freshness,
            alert,
            json,
        } => {
            info!("Running health check");
            commands::health_check(pool, config, providers, freshness, alert, json).await?;
        }
        Commands::TickerRegistry { status } => {
            commands::ticker_registry(pool, status).await?;
        }
        Commands::RegisterTickers { symbols } => {
            info!("Registering {} ticker(s)", symbols.len());
            commands::register_tickers(pool, symbols).await?;
        }
        Commands::Migrate => {
            commands::migrate(pool).await?;
        }
    }
    Ok(())
}
