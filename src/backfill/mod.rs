//! Price backfill: the periodic sweep path and the reactive bridge
//! invoked from the prediction pipeline

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SweepConfig;
use crate::data::{DataError, DataResult, FailedSymbolCache, PriceStore, ProviderChain};
use crate::outcomes::{OutcomeCalculator, OutcomeSweepSummary};
use crate::registry::{TickerRegistry, TickerStatus};

/// Result of backfilling one symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Bars fetched and stored; (records, serving provider)
    Fetched { records: usize, provider: String },
    /// Coverage already extends to the requested end date
    UpToDate,
    /// Known-bad or registry-invalid; no provider call made
    Skipped,
    /// Every provider definitively returned no data; ticker marked invalid
    NoData,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillSummary {
    pub symbols_processed: usize,
    pub symbols_fetched: usize,
    pub symbols_up_to_date: usize,
    pub symbols_skipped: usize,
    pub symbols_no_data: usize,
    pub records_upserted: usize,
    pub failures: usize,
}

/// Fetches missing price history through the provider chain and keeps
/// registry coverage metadata current.
pub struct BackfillService {
    chain: Arc<ProviderChain>,
    prices: PriceStore,
    registry: TickerRegistry,
    failed: Arc<FailedSymbolCache>,
}

impl BackfillService {
    pub fn new(
        chain: Arc<ProviderChain>,
        prices: PriceStore,
        registry: TickerRegistry,
        failed: Arc<FailedSymbolCache>,
    ) -> Self {
        Self {
            chain,
            prices,
            registry,
            failed,
        }
    }

    pub fn registry(&self) -> &TickerRegistry {
        &self.registry
    }

    /// Backfill one symbol's daily history over the trailing window,
    /// narrowed to the dates actually missing.
    pub async fn backfill_symbol(&self, symbol: &str, days_back: u32) -> DataResult<BackfillOutcome> {
        if self.failed.contains(symbol) {
            info!("Skipping {} (failed earlier this run)", symbol);
            return Ok(BackfillOutcome::Skipped);
        }

        if let Some(entry) = self.registry.get(symbol).await? {
            if entry.status == TickerStatus::Invalid {
                info!("Skipping {} (registry status INVALID)", symbol);
                return Ok(BackfillOutcome::Skipped);
            }
        }

        let end = Utc::now().date_naive();
        let mut start = end - chrono::Duration::days(days_back as i64);

        // Only fetch past the stored coverage edge
        if let Some(coverage) = self.prices.coverage(symbol).await? {
            let next_missing = coverage.end + chrono::Duration::days(1);
            if next_missing > start {
                start = next_missing;
            }
        }

        if start > end {
            return Ok(BackfillOutcome::UpToDate);
        }

        match self.chain.fetch_daily(symbol, start, end).await {
            Ok((bars, provider)) => {
                let records = self.prices.upsert_bars(&bars).await?;
                self.registry.update_price_metadata(symbol).await?;
                info!(
                    "Backfilled {} records for {} from {}",
                    records, symbol, provider
                );
                Ok(BackfillOutcome::Fetched { records, provider })
            }
            Err(DataError::NoData { .. }) => {
                // Definitive: every configured provider answered and none
                // has data for this symbol.
                self.registry
                    .mark_invalid(symbol, "no data from any provider")
                    .await?;
                self.failed.mark(symbol);
                warn!("{} returned no data from any provider; marked invalid", symbol);
                Ok(BackfillOutcome::NoData)
            }
            Err(err) => {
                self.failed.mark(symbol);
                Err(err)
            }
        }
    }

    /// Backfill a set of symbols, isolating per-symbol failures
    pub async fn backfill_symbols(&self, symbols: &[String], days_back: u32) -> BackfillSummary {
        let mut summary = BackfillSummary::default();

        for symbol in symbols {
            summary.symbols_processed += 1;
            match self.backfill_symbol(symbol, days_back).await {
                Ok(BackfillOutcome::Fetched { records, .. }) => {
                    summary.symbols_fetched += 1;
                    summary.records_upserted += records;
                }
                Ok(BackfillOutcome::UpToDate) => summary.symbols_up_to_date += 1,
                Ok(BackfillOutcome::Skipped) => summary.symbols_skipped += 1,
                Ok(BackfillOutcome::NoData) => summary.symbols_no_data += 1,
                Err(err) => {
                    warn!("Backfill failed for {}: {}", symbol, err);
                    summary.failures += 1;
                }
            }
        }

        summary
    }
}

#[derive(Debug)]
struct BackfillJob {
    prediction_id: Uuid,
    symbols: Vec<String>,
}

/// Crossing point between the async prediction pipeline and the blocking
/// backfill machinery. `trigger` hands work to a single dedicated worker
/// over a bounded channel and returns without awaiting completion.
///
/// Failures inside the dispatched work are logged and never propagated:
/// the prediction is already durably stored and the periodic sweep is the
/// backstop for anything missed here.
pub struct ReactiveBackfillBridge {
    tx: mpsc::Sender<BackfillJob>,
    registry: TickerRegistry,
}

impl ReactiveBackfillBridge {
    /// Spawn the worker and return the handle used by the prediction path
    pub fn start(
        service: Arc<BackfillService>,
        calculator: Arc<OutcomeCalculator>,
        outcomes: crate::outcomes::OutcomeStore,
        days_back: u32,
        sweeps: &SweepConfig,
    ) -> Self {
        let registry = service.registry().clone();
        let (tx, mut rx) = mpsc::channel::<BackfillJob>(sweeps.backfill_queue_capacity);

        info!(
            "Reactive backfill worker started (sweep backstop expected every {} min)",
            sweeps.sweep_interval_minutes
        );

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) =
                    Self::process(&service, &calculator, &outcomes, &job, days_back).await
                {
                    error!(
                        "Reactive backfill failed for prediction {}: {}",
                        job.prediction_id, err
                    );
                }
            }
            info!("Reactive backfill worker shutting down");
        });

        Self { tx, registry }
    }

    /// Fire-and-forget entry point called right after a prediction with a
    /// non-empty ticker list is stored. Never returns an error and never
    /// blocks on provider or outcome work.
    pub async fn trigger(&self, prediction_id: Uuid, symbols: &[String]) {
        if symbols.is_empty() {
            return;
        }

        // Registration is a single conflict-tolerant upsert; failures are
        // swallowed because the sweep re-registers from the predictions
        // table anyway.
        if let Err(err) = self.registry.register(symbols, Some(prediction_id)).await {
            warn!(
                "Ticker registration failed for prediction {}: {}",
                prediction_id, err
            );
        }

        let job = BackfillJob {
            prediction_id,
            symbols: symbols.to_vec(),
        };

        if let Err(err) = self.tx.try_send(job) {
            warn!(
                "Backfill queue full, dropping reactive trigger for prediction {} (sweep will recover): {}",
                prediction_id, err
            );
        }
    }

    async fn process(
        service: &BackfillService,
        calculator: &OutcomeCalculator,
        outcomes: &crate::outcomes::OutcomeStore,
        job: &BackfillJob,
        days_back: u32,
    ) -> DataResult<()> {
        let summary = service.backfill_symbols(&job.symbols, days_back).await;
        info!(
            "Reactive backfill for prediction {}: {} fetched, {} no-data, {} failures",
            job.prediction_id, summary.symbols_fetched, summary.symbols_no_data, summary.failures
        );

        if let Some(prediction) = outcomes.get_prediction(job.prediction_id).await? {
            let mut sweep = OutcomeSweepSummary::default();
            calculator
                .calculate_for_prediction(&prediction, &mut sweep)
                .await;
        }

        Ok(())
    }
}
