//! Reactive bridge contract: triggering returns before the dispatched work
//! completes, and failures inside that work never reach the caller.
//! Skipped without DATABASE_URL.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use tickerpulse::backfill::{BackfillService, ReactiveBackfillBridge};
use tickerpulse::config::{OutcomeConfig, RetryConfig, SweepConfig};
use tickerpulse::data::{
    DataError, DataResult, FailedSymbolCache, PredictedAsset, PriceBar, PriceProvider, PriceStore,
    ProviderChain, Sentiment,
};
use tickerpulse::outcomes::{OutcomeCalculator, OutcomeStore};
use tickerpulse::registry::TickerRegistry;

async fn setup_test_db() -> Option<PgPool> {
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

fn test_symbol(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &suffix[..6]).to_uppercase()
}

/// Provider that sleeps, then either serves the full range or fails,
/// flagging completion either way.
struct SlowProvider {
    delay: Duration,
    fail: bool,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl PriceProvider for SlowProvider {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<Vec<PriceBar>> {
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);

        if self.fail {
            return Err(DataError::Timeout {
                timeout_seconds: 30,
            });
        }

        let days = (end - start).num_days();
        Ok((0..=days)
            .map(|i| {
                let date = start + chrono::Duration::days(i);
                PriceBar {
                    symbol: symbol.to_string(),
                    date,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0 + i as f64,
                    adjusted_close: None,
                    volume: 500,
                    source: "slow".to_string(),
                }
            })
            .collect())
    }
}

fn build_bridge(
    pool: &PgPool,
    provider: Arc<SlowProvider>,
) -> ReactiveBackfillBridge {
    let chain = Arc::new(ProviderChain::new(
        vec![provider as Arc<dyn PriceProvider>],
        RetryConfig {
            max_retries: 1,
            base_delay_ms: 10,
            backoff_multiplier: 2.0,
        },
    ));

    let registry = TickerRegistry::new(pool.clone());
    let prices = PriceStore::new(pool.clone());
    let outcomes = OutcomeStore::new(pool.clone());
    let failed = Arc::new(FailedSymbolCache::new());

    let service = Arc::new(BackfillService::new(
        chain,
        prices.clone(),
        registry.clone(),
        failed.clone(),
    ));

    let calculator = Arc::new(OutcomeCalculator::new(
        outcomes.clone(),
        prices,
        registry,
        failed,
        OutcomeConfig {
            notional_position_usd: 1000.0,
        },
    ));

    ReactiveBackfillBridge::start(
        service,
        calculator,
        outcomes,
        30,
        &SweepConfig {
            sweep_interval_minutes: 15,
            backfill_queue_capacity: 16,
        },
    )
}

async fn insert_prediction(pool: &PgPool, symbol: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let assets = vec![PredictedAsset {
        symbol: symbol.to_string(),
        sentiment: Sentiment::Bullish,
    }];

    sqlx::query(
        "INSERT INTO predictions (id, assets, created_at, source_published_at) VALUES ($1, $2, NOW(), $3)",
    )
    .bind(id)
    .bind(serde_json::to_value(&assets)?)
    .bind(Utc::now() - chrono::Duration::days(5))
    .execute(pool)
    .await?;

    Ok(id)
}

#[tokio::test]
async fn test_trigger_returns_before_work_completes() -> Result<()> {
    let pool = match setup_test_db().await {
        Some(pool) => pool,
        None => return Ok(()),
    };

    let symbol = test_symbol("BRG");
    let prediction_id = insert_prediction(&pool, &symbol).await?;

    let finished = Arc::new(AtomicBool::new(false));
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_millis(400),
        fail: false,
        finished: finished.clone(),
    });

    let bridge = build_bridge(&pool, provider);

    let started = Instant::now();
    bridge.trigger(prediction_id, &[symbol.clone()]).await;
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_millis(250),
        "trigger must not await the provider work (took {:?})",
        elapsed
    );
    assert!(
        !finished.load(Ordering::SeqCst),
        "dispatched work still running when trigger returned"
    );

    // Registration happened on the trigger path
    let registry = TickerRegistry::new(pool.clone());
    assert!(registry.get(&symbol).await?.is_some());

    // Eventually the worker lands prices and an outcome row
    let mut outcome_exists = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM prediction_outcomes WHERE prediction_id = $1",
        )
        .bind(prediction_id)
        .fetch_one(&pool)
        .await?;
        if count == 1 {
            outcome_exists = true;
            break;
        }
    }

    assert!(finished.load(Ordering::SeqCst));
    assert!(outcome_exists, "worker should persist prices and an outcome row");

    Ok(())
}

#[tokio::test]
async fn test_failure_in_dispatched_work_never_propagates() -> Result<()> {
    let pool = match setup_test_db().await {
        Some(pool) => pool,
        None => return Ok(()),
    };

    let symbol = test_symbol("BRF");
    let prediction_id = insert_prediction(&pool, &symbol).await?;

    let finished = Arc::new(AtomicBool::new(false));
    let provider = Arc::new(SlowProvider {
        delay: Duration::from_millis(50),
        fail: true,
        finished: finished.clone(),
    });

    let bridge = build_bridge(&pool, provider);

    // The provider will fail; trigger still returns unit, not a Result
    bridge.trigger(prediction_id, &[symbol.clone()]).await;

    // Give the worker time to hit the failure
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if finished.load(Ordering::SeqCst) {
            break;
        }
    }
    assert!(finished.load(Ordering::SeqCst));

    // No outcome row appeared, and nothing panicked or surfaced: the
    // sweep is the backstop for this prediction
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM prediction_outcomes WHERE prediction_id = $1")
            .bind(prediction_id)
            .fetch_one(&pool)
            .await?;
    assert_eq!(count, 0);

    Ok(())
}
