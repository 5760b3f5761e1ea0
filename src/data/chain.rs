use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{info, warn};

use crate::config::{Config, RetryConfig};

use super::provider::PriceProvider;
use super::{DataError, DataResult, PolygonProvider, PriceBar, ProviderFailure, YahooProvider};

/// Per-provider call counters, surfaced in the health report
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Symbols known-bad within this run; skipped before any provider call.
/// Process-local, never persisted, cleared on restart.
#[derive(Debug, Default)]
pub struct FailedSymbolCache {
    inner: Mutex<HashSet<String>>,
}

impl FailedSymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, symbol: &str) {
        self.inner
            .lock()
            .expect("failed symbol cache lock poisoned")
            .insert(symbol.to_string());
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.inner
            .lock()
            .expect("failed symbol cache lock poisoned")
            .contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("failed symbol cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("failed symbol cache lock poisoned")
            .clear();
    }
}

/// Ordered, fallback-capable sequence of price providers.
///
/// Providers are tried strictly in priority order, never in parallel:
/// the cheaper/more-trusted source exhausts its whole retry budget before
/// the chain pays for a fallback call.
pub struct ProviderChain {
    providers: Vec<Arc<dyn PriceProvider>>,
    retry: RetryConfig,
    stats: Mutex<HashMap<String, ProviderStats>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn PriceProvider>>, retry: RetryConfig) -> Self {
        let stats = providers
            .iter()
            .map(|p| (p.name().to_string(), ProviderStats::default()))
            .collect();

        Self {
            providers,
            retry,
            stats: Mutex::new(stats),
        }
    }

    /// Build the chain from configuration, honoring `PROVIDER_PRIORITY`.
    /// Unknown names and providers missing credentials are skipped with a
    /// warning rather than failing startup.
    pub fn from_config(config: &Config) -> DataResult<Self> {
        let mut providers: Vec<Arc<dyn PriceProvider>> = Vec::new();
        let timeout = config.providers.request_timeout_seconds;

        for name in &config.providers.priority {
            match name.as_str() {
                "polygon" => match &config.providers.polygon_api_key {
                    Some(key) => {
                        providers.push(Arc::new(PolygonProvider::new(key.clone(), timeout)?));
                    }
                    None => {
                        warn!("POLYGON_API_KEY not set; skipping polygon provider");
                    }
                },
                "yahoo" => {
                    providers.push(Arc::new(YahooProvider::new(timeout)?));
                }
                other => {
                    warn!("Unknown provider '{}' in PROVIDER_PRIORITY; skipping", other);
                }
            }
        }

        if providers.is_empty() {
            return Err(DataError::Config(
                "No usable price providers configured".to_string(),
            ));
        }

        Ok(Self::new(providers, config.retry.clone()))
    }

    pub fn providers(&self) -> &[Arc<dyn PriceProvider>] {
        &self.providers
    }

    /// Retry delays within one provider: base_delay * multiplier^attempt.
    /// `max_retries` counts attempts, so the schedule has max_retries - 1
    /// sleeps after the immediate first try.
    fn retry_delays(&self) -> Vec<Duration> {
        (0..self.retry.max_retries.saturating_sub(1))
            .map(|attempt| {
                let millis = self.retry.base_delay_ms as f64
                    * self.retry.backoff_multiplier.powi(attempt as i32);
                Duration::from_millis(millis as u64)
            })
            .collect()
    }

    /// Fetch daily bars for the inclusive range, falling back through the
    /// configured providers. Returns the bars and the name of the provider
    /// that served them.
    ///
    /// A provider answering with an empty series is "no data", not a
    /// transport failure; the chain still advances to the next provider in
    /// case it has coverage. When every provider reports no data the whole
    /// chain returns `NoData`, which callers use to mark the ticker
    /// invalid. Mixed failures aggregate into `ChainExhausted`.
    pub async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<(Vec<PriceBar>, String)> {
        let mut failures: Vec<ProviderFailure> = Vec::new();

        for provider in &self.providers {
            let name = provider.name();
            let delays = self.retry_delays();

            let result = RetryIf::spawn(
                delays,
                || provider.fetch_daily(symbol, start, end),
                |err: &DataError| {
                    let retryable = err.is_retryable();
                    if retryable {
                        warn!("Retryable error from {}: {}", name, err);
                    }
                    retryable
                },
            )
            .await;

            match result {
                Ok(bars) if bars.is_empty() => {
                    self.record_failure(name, "no data");
                    failures.push(ProviderFailure {
                        provider: name.to_string(),
                        error: "no data".to_string(),
                        no_data: true,
                    });
                    info!("{} has no data for {}; trying next provider", name, symbol);
                }
                Ok(bars) => {
                    self.record_success(name);
                    info!(
                        "Fetched {} bars for {} from {} ({} to {})",
                        bars.len(),
                        symbol,
                        name,
                        start,
                        end
                    );
                    return Ok((bars, name.to_string()));
                }
                Err(err) => {
                    self.record_failure(name, &err.to_string());
                    let no_data = matches!(err, DataError::NoData { .. });
                    warn!("Provider {} failed for {}: {}", name, symbol, err);
                    failures.push(ProviderFailure {
                        provider: name.to_string(),
                        error: err.to_string(),
                        no_data,
                    });
                }
            }
        }

        if !failures.is_empty() && failures.iter().all(|f| f.no_data) {
            return Err(DataError::NoData {
                symbol: symbol.to_string(),
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        Err(DataError::ChainExhausted {
            symbol: symbol.to_string(),
            failures,
        })
    }

    fn record_success(&self, provider: &str) {
        let mut stats = self.stats.lock().expect("provider stats lock poisoned");
        let entry = stats.entry(provider.to_string()).or_default();
        entry.requests += 1;
        entry.successes += 1;
        entry.consecutive_failures = 0;
        entry.last_success_at = Some(Utc::now());
    }

    fn record_failure(&self, provider: &str, error: &str) {
        let mut stats = self.stats.lock().expect("provider stats lock poisoned");
        let entry = stats.entry(provider.to_string()).or_default();
        entry.requests += 1;
        entry.failures += 1;
        entry.consecutive_failures += 1;
        entry.last_error = Some(error.to_string());
    }

    pub fn stats_snapshot(&self) -> HashMap<String, ProviderStats> {
        self.stats
            .lock()
            .expect("provider stats lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_with_retry(max_retries: u32, base_delay_ms: u64, multiplier: f64) -> ProviderChain {
        ProviderChain::new(
            Vec::new(),
            RetryConfig {
                max_retries,
                base_delay_ms,
                backoff_multiplier: multiplier,
            },
        )
    }

    #[test]
    fn test_retry_delay_schedule() {
        let chain = chain_with_retry(4, 100, 2.0);
        let delays = chain.retry_delays();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        let chain = chain_with_retry(1, 100, 2.0);
        assert!(chain.retry_delays().is_empty());
    }

    #[test]
    fn test_failed_symbol_cache() {
        let cache = FailedSymbolCache::new();
        assert!(!cache.contains("FAKE123"));
        cache.mark("FAKE123");
        assert!(cache.contains("FAKE123"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
