//! Deterministic outcome math and the idempotent batch driver

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::OutcomeConfig;
use crate::data::{
    DataResult, FailedSymbolCache, PredictedAsset, Prediction, PriceRecord, PriceStore, Sentiment,
    validation,
};
use crate::registry::{TickerRegistry, TickerStatus};

use super::{HorizonValue, HorizonValues, OutcomeStore, TRADING_DAY_HORIZONS};

/// Percentage return between entry and a later close
pub fn percent_return(entry_price: f64, close: f64) -> f64 {
    (close - entry_price) / entry_price * 100.0
}

/// Whether the realized return's sign matches the predicted direction.
/// Neutral predictions have no direction to score, so they stay None.
pub fn direction_correct(sentiment: Sentiment, return_pct: f64) -> Option<bool> {
    match sentiment {
        Sentiment::Bullish => Some(return_pct > 0.0),
        Sentiment::Bearish => Some(return_pct < 0.0),
        Sentiment::Neutral => None,
    }
}

/// P&L of a fixed notional position: long for bullish, short for bearish.
/// Neutral takes no position.
pub fn notional_pnl(sentiment: Sentiment, return_pct: f64, notional_usd: f64) -> Option<f64> {
    let direction = sentiment.direction();
    if direction == 0 {
        return None;
    }
    Some(notional_usd * (return_pct / 100.0) * direction as f64)
}

/// Index of the entry bar: the first trading date at or after the anchor
fn entry_index(series: &[PriceRecord], anchor: NaiveDate) -> Option<usize> {
    series.iter().position(|r| r.date >= anchor)
}

/// Compute values for every horizon reachable within the stored series.
/// Horizons count trading days as stored rows, so weekends and holidays
/// never shift an offset.
fn compute_horizons(
    series: &[PriceRecord],
    entry_idx: usize,
    entry_price: f64,
    sentiment: Sentiment,
    notional_usd: f64,
) -> HorizonValues {
    let mut values = HorizonValues::default();

    for (slot, horizon) in TRADING_DAY_HORIZONS.iter().enumerate() {
        let value = match series.get(entry_idx + horizon) {
            Some(record) => {
                let ret = percent_return(entry_price, record.close);
                HorizonValue {
                    return_pct: Some(ret),
                    correct: direction_correct(sentiment, ret),
                    pnl: notional_pnl(sentiment, ret, notional_usd),
                }
            }
            // Horizon not yet reached - not an error
            None => HorizonValue::default(),
        };

        match slot {
            0 => values.t1 = value,
            1 => values.t3 = value,
            2 => values.t7 = value,
            3 => values.t30 = value,
            _ => unreachable!(),
        }
    }

    values
}

/// Result of processing one (prediction, symbol) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Row created or horizons filled; true when now complete
    Updated { complete: bool },
    /// Registry says invalid; no provider work attempted
    SkippedInvalid,
    /// Known-bad within this run; no provider work attempted
    SkippedFailedSymbol,
    /// Malformed symbol in the prediction payload
    SkippedMalformed,
    /// No stored prices at or after the anchor yet
    AwaitingPrices,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutcomeSweepSummary {
    pub predictions_seen: usize,
    pub pairs_updated: usize,
    pub pairs_completed: usize,
    pub pairs_skipped: usize,
    pub pairs_awaiting_prices: usize,
    pub failures: usize,
}

/// Computes outcome rows from predictions and stored price series.
/// Safe to re-run: existing anchor/entry assumptions are reused and
/// already-computed horizons are never overwritten.
pub struct OutcomeCalculator {
    outcomes: OutcomeStore,
    prices: PriceStore,
    registry: TickerRegistry,
    failed: Arc<FailedSymbolCache>,
    config: OutcomeConfig,
}

impl OutcomeCalculator {
    pub fn new(
        outcomes: OutcomeStore,
        prices: PriceStore,
        registry: TickerRegistry,
        failed: Arc<FailedSymbolCache>,
        config: OutcomeConfig,
    ) -> Self {
        Self {
            outcomes,
            prices,
            registry,
            failed,
            config,
        }
    }

    /// Compute or extend the outcome row for one (prediction, symbol)
    pub async fn calculate_for_pair(
        &self,
        prediction: &Prediction,
        asset: &PredictedAsset,
    ) -> DataResult<PairOutcome> {
        let symbol = match validation::normalize_symbol(&asset.symbol) {
            Some(s) => s,
            None => return Ok(PairOutcome::SkippedMalformed),
        };

        if self.failed.contains(&symbol) {
            return Ok(PairOutcome::SkippedFailedSymbol);
        }

        if let Some(entry) = self.registry.get(&symbol).await? {
            if entry.status == TickerStatus::Invalid {
                return Ok(PairOutcome::SkippedInvalid);
            }
        }

        let existing = self.outcomes.get(prediction.id, &symbol).await?;

        // Anchor and entry price are fixed on first computation; a sweep
        // re-run must extend the row under the same assumptions, never
        // re-derive them.
        let anchor = existing
            .as_ref()
            .map(|o| o.prediction_date)
            .unwrap_or_else(|| prediction.anchor_date());

        let series = self.prices.get_series(&symbol, Some(anchor)).await?;

        let entry_idx = match entry_index(&series, anchor) {
            Some(idx) => idx,
            None => return Ok(PairOutcome::AwaitingPrices),
        };

        let entry_price = existing
            .as_ref()
            .map(|o| o.entry_price)
            .unwrap_or(series[entry_idx].close);

        let values = compute_horizons(
            &series,
            entry_idx,
            entry_price,
            asset.sentiment,
            self.config.notional_position_usd,
        );

        let outcome = self
            .outcomes
            .upsert(prediction.id, &symbol, anchor, entry_price, &values)
            .await?;

        Ok(PairOutcome::Updated {
            complete: outcome.is_complete,
        })
    }

    /// Process every asset of one prediction, isolating per-pair failures
    pub async fn calculate_for_prediction(
        &self,
        prediction: &Prediction,
        summary: &mut OutcomeSweepSummary,
    ) {
        for asset in &prediction.assets {
            match self.calculate_for_pair(prediction, asset).await {
                Ok(PairOutcome::Updated { complete }) => {
                    summary.pairs_updated += 1;
                    if complete {
                        summary.pairs_completed += 1;
                    }
                }
                Ok(PairOutcome::AwaitingPrices) => {
                    summary.pairs_awaiting_prices += 1;
                }
                Ok(_) => {
                    summary.pairs_skipped += 1;
                }
                Err(err) => {
                    // One bad symbol must not abort the batch; the pair's
                    // transaction has already been rolled back.
                    warn!(
                        "Outcome calculation failed for prediction {} symbol {}: {}",
                        prediction.id, asset.symbol, err
                    );
                    summary.failures += 1;
                }
            }
        }
    }

    /// Batch driver: iterate predictions missing complete outcomes
    pub async fn calculate_all(&self, limit: i64) -> DataResult<OutcomeSweepSummary> {
        let predictions = self.outcomes.pending_predictions(limit).await?;
        let mut summary = OutcomeSweepSummary {
            predictions_seen: predictions.len(),
            ..Default::default()
        };

        for prediction in &predictions {
            self.calculate_for_prediction(prediction, &mut summary).await;
        }

        info!(
            "Outcome sweep: {} predictions, {} pairs updated ({} complete), {} awaiting prices, {} skipped, {} failures",
            summary.predictions_seen,
            summary.pairs_updated,
            summary.pairs_completed,
            summary.pairs_awaiting_prices,
            summary.pairs_skipped,
            summary.failures
        );

        Ok(summary)
    }
}
