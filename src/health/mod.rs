//! Provider and data-freshness health checks
//! Pure read/report: never mutates the registry or price tables

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::HealthConfig;
use crate::data::{DataResult, ProviderChain, ProviderStats};
use crate::registry::{TickerRegistry, TickerStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    /// Call counters accumulated by the chain this run
    pub stats: ProviderStats,
    /// True when the most recent chain calls to this provider failed
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolFreshness {
    pub symbol: String,
    pub price_data_end: Option<NaiveDate>,
    /// None when the symbol has no stored prices at all
    pub trading_days_behind: Option<i64>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub generated_at: chrono::DateTime<Utc>,
    pub providers: Vec<ProviderHealth>,
    pub freshness: Vec<SymbolFreshness>,
    pub stale_symbols: usize,
    pub healthy: bool,
}

/// Count trading days (weekdays) in the half-open range (from, to]
pub fn trading_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    if to <= from {
        return 0;
    }

    let mut count = 0;
    let mut day = from + chrono::Duration::days(1);
    while day <= to {
        let weekday = day.weekday();
        if weekday != chrono::Weekday::Sat && weekday != chrono::Weekday::Sun {
            count += 1;
        }
        day += chrono::Duration::days(1);
    }
    count
}

pub struct HealthMonitor {
    chain: Arc<ProviderChain>,
    registry: TickerRegistry,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(chain: Arc<ProviderChain>, registry: TickerRegistry, config: HealthConfig) -> Self {
        Self {
            chain,
            registry,
            config,
        }
    }

    /// Issue a cheap canary request per provider and report reachability
    /// plus latency, merged with the chain's call counters.
    pub async fn check_provider_health(&self) -> Vec<ProviderHealth> {
        let stats = self.chain.stats_snapshot();
        let mut results = Vec::new();

        for provider in self.chain.providers() {
            let name = provider.name();
            let started = Instant::now();
            let probe = provider.probe().await;
            let latency = started.elapsed();

            let provider_stats = stats.get(name).cloned().unwrap_or_default();
            let degraded = provider_stats.consecutive_failures > 0;

            match probe {
                Ok(()) => {
                    info!(
                        "Provider {} reachable ({} ms)",
                        name,
                        latency.as_millis()
                    );
                    results.push(ProviderHealth {
                        name: name.to_string(),
                        reachable: true,
                        latency_ms: Some(latency.as_millis() as u64),
                        error: None,
                        stats: provider_stats,
                        degraded,
                    });
                }
                Err(err) => {
                    results.push(ProviderHealth {
                        name: name.to_string(),
                        reachable: false,
                        latency_ms: None,
                        error: Some(err.to_string()),
                        stats: provider_stats,
                        degraded: true,
                    });
                }
            }
        }

        results
    }

    /// Compare each active symbol's coverage edge against the staleness
    /// threshold (in trading days)
    pub async fn check_data_freshness(&self) -> DataResult<Vec<SymbolFreshness>> {
        let today = Utc::now().date_naive();
        let entries = self.registry.list(Some(TickerStatus::Active)).await?;

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let freshness = match entry.price_data_end {
                Some(end) => {
                    let behind = trading_days_between(end, today);
                    SymbolFreshness {
                        symbol: entry.symbol,
                        price_data_end: Some(end),
                        trading_days_behind: Some(behind),
                        stale: behind > self.config.staleness_days,
                    }
                }
                // Never fetched: stale by definition
                None => SymbolFreshness {
                    symbol: entry.symbol,
                    price_data_end: None,
                    trading_days_behind: None,
                    stale: true,
                },
            };
            results.push(freshness);
        }

        Ok(results)
    }

    /// Aggregate both checks into one serializable report
    pub async fn run_health_check(
        &self,
        include_providers: bool,
        include_freshness: bool,
    ) -> DataResult<HealthReport> {
        let providers = if include_providers {
            self.check_provider_health().await
        } else {
            Vec::new()
        };

        let freshness = if include_freshness {
            self.check_data_freshness().await?
        } else {
            Vec::new()
        };

        let stale_symbols = freshness.iter().filter(|f| f.stale).count();
        let healthy = providers.iter().all(|p| p.reachable && !p.degraded) && stale_symbols == 0;

        Ok(HealthReport {
            generated_at: Utc::now(),
            providers,
            freshness,
            stale_symbols,
            healthy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_trading_days_skip_weekends() {
        // Friday 2024-01-05 to Monday 2024-01-08: one trading day
        assert_eq!(trading_days_between(date(2024, 1, 5), date(2024, 1, 8)), 1);
        // Friday to next Friday: five trading days
        assert_eq!(trading_days_between(date(2024, 1, 5), date(2024, 1, 12)), 5);
        // Same day and inverted ranges are zero
        assert_eq!(trading_days_between(date(2024, 1, 5), date(2024, 1, 5)), 0);
        assert_eq!(trading_days_between(date(2024, 1, 8), date(2024, 1, 5)), 0);
    }

    #[test]
    fn test_weekend_gap_is_not_stale() {
        // Friday close checked on Sunday: zero trading days behind
        assert_eq!(trading_days_between(date(2024, 1, 5), date(2024, 1, 7)), 0);
    }
}
