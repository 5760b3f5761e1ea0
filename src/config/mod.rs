use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub providers: ProviderConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub outcomes: OutcomeConfig,
    pub sweeps: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider names in fallback order, e.g. ["polygon", "yahoo"]
    pub priority: Vec<String>,
    pub polygon_api_key: Option<String>,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per provider before falling back to the next one
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Trading days before a symbol's price coverage counts as stale
    pub staleness_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeConfig {
    /// Fixed hypothetical dollar exposure used to convert percentage
    /// returns into comparable P&L figures
    pub notional_position_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval the external scheduler is expected to run the outcome
    /// sweep at; recognized here for the bridge's logging only
    pub sweep_interval_minutes: u64,
    pub backfill_queue_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file - this sets env vars that aren't already set
        dotenv::dotenv().ok();

        // Database configuration - DATABASE_URL is required
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL environment variable is required but not set")?;

        let config = Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("Invalid DB_MAX_CONNECTIONS value")?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .context("Invalid DB_MIN_CONNECTIONS value")?,
            },
            providers: ProviderConfig {
                priority: env::var("PROVIDER_PRIORITY")
                    .unwrap_or_else(|_| "polygon,yahoo".to_string())
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
                polygon_api_key: env::var("POLYGON_API_KEY").ok(),
                request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid REQUEST_TIMEOUT_SECONDS value")?,
            },
            retry: RetryConfig {
                max_retries: env::var("MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .context("Invalid MAX_RETRIES value")?,
                base_delay_ms: env::var("BASE_DELAY_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .context("Invalid BASE_DELAY_MS value")?,
                backoff_multiplier: env::var("BACKOFF_MULTIPLIER")
                    .unwrap_or_else(|_| "2.0".to_string())
                    .parse()
                    .context("Invalid BACKOFF_MULTIPLIER value")?,
            },
            health: HealthConfig {
                staleness_days: env::var("STALENESS_DAYS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .context("Invalid STALENESS_DAYS value")?,
            },
            outcomes: OutcomeConfig {
                notional_position_usd: env::var("NOTIONAL_POSITION_USD")
                    .unwrap_or_else(|_| "1000.0".to_string())
                    .parse()
                    .context("Invalid NOTIONAL_POSITION_USD value")?,
            },
            sweeps: SweepConfig {
                sweep_interval_minutes: env::var("SWEEP_INTERVAL_MINUTES")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .context("Invalid SWEEP_INTERVAL_MINUTES value")?,
                backfill_queue_capacity: env::var("BACKFILL_QUEUE_CAPACITY")
                    .unwrap_or_else(|_| "256".to_string())
                    .parse()
                    .context("Invalid BACKFILL_QUEUE_CAPACITY value")?,
            },
        };

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/tickerpulse".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            providers: ProviderConfig {
                priority: vec!["polygon".to_string(), "yahoo".to_string()],
                polygon_api_key: None,
                request_timeout_seconds: 30,
            },
            retry: RetryConfig {
                max_retries: 3,
                base_delay_ms: 500,
                backoff_multiplier: 2.0,
            },
            health: HealthConfig { staleness_days: 3 },
            outcomes: OutcomeConfig {
                notional_position_usd: 1000.0,
            },
            sweeps: SweepConfig {
                sweep_interval_minutes: 15,
                backfill_queue_capacity: 256,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_provider_priority() {
        let config = Config::default();
        assert_eq!(config.providers.priority, vec!["polygon", "yahoo"]);
        assert_eq!(config.retry.max_retries, 3);
    }
}
