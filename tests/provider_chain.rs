//! Provider chain behavior with scripted in-memory providers: fallback
//! ordering, retry-with-backoff, and no-data handling. No database needed.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tickerpulse::config::RetryConfig;
use tickerpulse::data::{
    DataError, DataResult, PriceBar, PriceProvider, ProviderChain,
};

#[derive(Clone, Copy)]
enum Step {
    Bars(usize),
    Empty,
    Timeout,
    NotFound,
}

/// Provider that replays a fixed script, one step per call, repeating the
/// last step once the script runs out.
struct ScriptedProvider {
    name: &'static str,
    script: Vec<Step>,
    calls: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    fn new(name: &'static str, script: Vec<Step>, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script,
            calls: AtomicUsize::new(0),
            log,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn bars(symbol: &str, start: NaiveDate, n: usize) -> Vec<PriceBar> {
    (0..n)
        .map(|i| PriceBar {
            symbol: symbol.to_string(),
            date: start + chrono::Duration::days(i as i64),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            adjusted_close: Some(100.5),
            volume: 1_000,
            source: "scripted".to_string(),
        })
        .collect()
}

#[async_trait]
impl PriceProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        _end: NaiveDate,
    ) -> DataResult<Vec<PriceBar>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .expect("log lock")
            .push(self.name.to_string());

        let step = self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .copied()
            .expect("script must not be empty");

        match step {
            Step::Bars(n) => Ok(bars(symbol, start, n)),
            Step::Empty => Ok(Vec::new()),
            Step::Timeout => Err(DataError::Timeout {
                timeout_seconds: 30,
            }),
            Step::NotFound => Err(DataError::api_error(404, "unknown symbol")),
        }
    }
}

fn retry(max_retries: u32, base_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay_ms,
        backoff_multiplier: 2.0,
    }
}

fn range() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date"),
        NaiveDate::from_ymd_opt(2024, 2, 2).expect("valid date"),
    )
}

#[tokio::test]
async fn retry_then_succeed_never_falls_back() {
    let log = Arc::new(Mutex::new(Vec::new()));
    // Primary fails twice then succeeds on the third attempt
    let primary = ScriptedProvider::new(
        "primary",
        vec![Step::Timeout, Step::Timeout, Step::Bars(5)],
        log.clone(),
    );
    let secondary = ScriptedProvider::new("secondary", vec![Step::Bars(5)], log.clone());

    let chain = ProviderChain::new(
        vec![primary.clone() as Arc<dyn PriceProvider>, secondary.clone()],
        retry(3, 50),
    );

    let (start, end) = range();
    let started = Instant::now();
    let (records, provider) = chain
        .fetch_daily("AAPL", start, end)
        .await
        .expect("chain should succeed via primary");
    let elapsed = started.elapsed();

    assert_eq!(provider, "primary");
    assert_eq!(records.len(), 5);
    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 0, "fallback must not be invoked");
    // Two retry delays: 50ms + 100ms
    assert!(
        elapsed.as_millis() >= 140,
        "expected two backoff sleeps, elapsed {:?}",
        elapsed
    );
}

#[tokio::test]
async fn exhausted_primary_falls_back_to_secondary() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let primary = ScriptedProvider::new("primary", vec![Step::Timeout], log.clone());
    let secondary = ScriptedProvider::new("secondary", vec![Step::Bars(3)], log.clone());

    let chain = ProviderChain::new(
        vec![primary.clone() as Arc<dyn PriceProvider>, secondary.clone()],
        retry(3, 10),
    );

    let (start, end) = range();
    let (records, provider) = chain
        .fetch_daily("MSFT", start, end)
        .await
        .expect("secondary should serve the request");

    assert_eq!(provider, "secondary");
    assert_eq!(records.len(), 3);
    assert_eq!(primary.calls(), 3, "primary exhausts its full retry budget");

    // Strictly sequential: every primary attempt precedes the secondary call
    let order = log.lock().expect("log lock").clone();
    assert_eq!(order, vec!["primary", "primary", "primary", "secondary"]);

    // Chain counters feed the health report: primary is degraded
    let stats = chain.stats_snapshot();
    let primary_stats = stats.get("primary").expect("primary stats");
    assert_eq!(primary_stats.successes, 0);
    assert!(primary_stats.consecutive_failures > 0);
    let secondary_stats = stats.get("secondary").expect("secondary stats");
    assert_eq!(secondary_stats.successes, 1);
    assert_eq!(secondary_stats.consecutive_failures, 0);
}

#[tokio::test]
async fn terminal_error_skips_retries() {
    let log = Arc::new(Mutex::new(Vec::new()));
    // 404 is terminal for the provider: no retry budget spent on it
    let primary = ScriptedProvider::new("primary", vec![Step::NotFound], log.clone());
    let secondary = ScriptedProvider::new("secondary", vec![Step::Bars(2)], log.clone());

    let chain = ProviderChain::new(
        vec![primary.clone() as Arc<dyn PriceProvider>, secondary.clone()],
        retry(5, 10),
    );

    let (start, end) = range();
    let (_, provider) = chain
        .fetch_daily("TSLA", start, end)
        .await
        .expect("secondary should serve the request");

    assert_eq!(provider, "secondary");
    assert_eq!(primary.calls(), 1, "non-retryable failure aborts immediately");
}

#[tokio::test]
async fn all_providers_empty_is_no_data() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let primary = ScriptedProvider::new("primary", vec![Step::Empty], log.clone());
    let secondary = ScriptedProvider::new("secondary", vec![Step::Empty], log.clone());

    let chain = ProviderChain::new(vec![primary as Arc<dyn PriceProvider>, secondary], retry(2, 10));

    let (start, end) = range();
    let err = chain
        .fetch_daily("FAKE123", start, end)
        .await
        .expect_err("no provider has data");

    // Callers key ticker invalidation off this variant
    assert!(matches!(err, DataError::NoData { .. }));
}

#[tokio::test]
async fn mixed_failures_aggregate_into_chain_exhausted() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let primary = ScriptedProvider::new("primary", vec![Step::Timeout], log.clone());
    let secondary = ScriptedProvider::new("secondary", vec![Step::Empty], log.clone());

    let chain = ProviderChain::new(vec![primary as Arc<dyn PriceProvider>, secondary], retry(2, 10));

    let (start, end) = range();
    let err = chain
        .fetch_daily("NVDA", start, end)
        .await
        .expect_err("every provider failed");

    match err {
        DataError::ChainExhausted { symbol, failures } => {
            assert_eq!(symbol, "NVDA");
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].provider, "primary");
            assert!(!failures[0].no_data);
            assert_eq!(failures[1].provider, "secondary");
            assert!(failures[1].no_data);
        }
        other => panic!("expected ChainExhausted, got {:?}", other),
    }
}
