//! Prediction outcome rows and their persistence
//! One row per (prediction, symbol); horizons fill in as prices arrive

pub mod calculator;

pub use calculator::{OutcomeCalculator, OutcomeSweepSummary, PairOutcome};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::{DataError, DataResult, PredictedAsset, Prediction};

/// Forward offsets (in trading days) at which returns are evaluated
pub const TRADING_DAY_HORIZONS: [usize; 4] = [1, 3, 7, 30];

/// One row of `prediction_outcomes`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PredictionOutcome {
    pub id: Uuid,
    pub prediction_id: Uuid,
    pub symbol: String,
    /// Anchor date: the source content's publish date, not processing time
    pub prediction_date: NaiveDate,
    pub entry_price: f64,
    pub return_t1: Option<f64>,
    pub return_t3: Option<f64>,
    pub return_t7: Option<f64>,
    pub return_t30: Option<f64>,
    pub correct_t1: Option<bool>,
    pub correct_t3: Option<bool>,
    pub correct_t7: Option<bool>,
    pub correct_t30: Option<bool>,
    pub pnl_t1: Option<f64>,
    pub pnl_t3: Option<f64>,
    pub pnl_t7: Option<f64>,
    pub pnl_t30: Option<f64>,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newly computed values for one horizon; None = not yet evaluable
#[derive(Debug, Clone, Copy, Default)]
pub struct HorizonValue {
    pub return_pct: Option<f64>,
    pub correct: Option<bool>,
    pub pnl: Option<f64>,
}

/// Values for all four horizons, ordered as TRADING_DAY_HORIZONS
#[derive(Debug, Clone, Copy, Default)]
pub struct HorizonValues {
    pub t1: HorizonValue,
    pub t3: HorizonValue,
    pub t7: HorizonValue,
    pub t30: HorizonValue,
}

#[derive(Clone)]
pub struct OutcomeStore {
    pool: PgPool,
}

impl OutcomeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        prediction_id: Uuid,
        symbol: &str,
    ) -> DataResult<Option<PredictionOutcome>> {
        let outcome = sqlx::query_as::<_, PredictionOutcome>(
            r#"
            SELECT id, prediction_id, symbol, prediction_date, entry_price,
                   return_t1, return_t3, return_t7, return_t30,
                   correct_t1, correct_t3, correct_t7, correct_t30,
                   pnl_t1, pnl_t3, pnl_t7, pnl_t30,
                   is_complete, created_at, updated_at
            FROM prediction_outcomes
            WHERE prediction_id = $1 AND symbol = $2
            "#,
        )
        .bind(prediction_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(outcome)
    }

    /// Create-if-missing then fill newly available horizons. Both writes
    /// run in one transaction; on failure the transaction is rolled back
    /// explicitly so the batch driver can continue with a clean slate.
    ///
    /// Horizon columns update through COALESCE(existing, new): an
    /// already-computed value is never overwritten, so re-running the
    /// sweep cannot corrupt complete horizons, and `is_complete` can only
    /// transition false → true.
    pub async fn upsert(
        &self,
        prediction_id: Uuid,
        symbol: &str,
        anchor: NaiveDate,
        entry_price: f64,
        values: &HorizonValues,
    ) -> DataResult<PredictionOutcome> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO prediction_outcomes (prediction_id, symbol, prediction_date, entry_price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (prediction_id, symbol) DO NOTHING
            "#,
        )
        .bind(prediction_id)
        .bind(symbol)
        .bind(anchor)
        .bind(entry_price)
        .execute(&mut *tx)
        .await;

        if let Err(err) = insert {
            tx.rollback().await.ok();
            return Err(DataError::Database(err));
        }

        let updated = sqlx::query_as::<_, PredictionOutcome>(
            r#"
            UPDATE prediction_outcomes SET
                return_t1 = COALESCE(return_t1, $3),
                return_t3 = COALESCE(return_t3, $4),
                return_t7 = COALESCE(return_t7, $5),
                return_t30 = COALESCE(return_t30, $6),
                correct_t1 = COALESCE(correct_t1, $7),
                correct_t3 = COALESCE(correct_t3, $8),
                correct_t7 = COALESCE(correct_t7, $9),
                correct_t30 = COALESCE(correct_t30, $10),
                pnl_t1 = COALESCE(pnl_t1, $11),
                pnl_t3 = COALESCE(pnl_t3, $12),
                pnl_t7 = COALESCE(pnl_t7, $13),
                pnl_t30 = COALESCE(pnl_t30, $14),
                is_complete = (
                    COALESCE(return_t1, $3) IS NOT NULL
                    AND COALESCE(return_t3, $4) IS NOT NULL
                    AND COALESCE(return_t7, $5) IS NOT NULL
                    AND COALESCE(return_t30, $6) IS NOT NULL
                ),
                updated_at = NOW()
            WHERE prediction_id = $1 AND symbol = $2
            RETURNING id, prediction_id, symbol, prediction_date, entry_price,
                      return_t1, return_t3, return_t7, return_t30,
                      correct_t1, correct_t3, correct_t7, correct_t30,
                      pnl_t1, pnl_t3, pnl_t7, pnl_t30,
                      is_complete, created_at, updated_at
            "#,
        )
        .bind(prediction_id)
        .bind(symbol)
        .bind(values.t1.return_pct)
        .bind(values.t3.return_pct)
        .bind(values.t7.return_pct)
        .bind(values.t30.return_pct)
        .bind(values.t1.correct)
        .bind(values.t3.correct)
        .bind(values.t7.correct)
        .bind(values.t30.correct)
        .bind(values.t1.pnl)
        .bind(values.t3.pnl)
        .bind(values.t7.pnl)
        .bind(values.t30.pnl)
        .fetch_one(&mut *tx)
        .await;

        match updated {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                tx.rollback().await.ok();
                Err(DataError::Database(err))
            }
        }
    }

    /// Predictions with at least one asset missing a complete outcome,
    /// most recent first
    pub async fn pending_predictions(&self, limit: i64) -> DataResult<Vec<Prediction>> {
        let rows: Vec<(Uuid, serde_json::Value, DateTime<Utc>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                r#"
                SELECT p.id, p.assets, p.created_at, p.source_published_at
                FROM predictions p
                WHERE EXISTS (
                    SELECT 1 FROM jsonb_array_elements(p.assets) a
                    LEFT JOIN prediction_outcomes o
                        ON o.prediction_id = p.id AND o.symbol = UPPER(a->>'symbol')
                    WHERE o.id IS NULL OR NOT o.is_complete
                )
                ORDER BY p.created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_prediction).collect()
    }

    /// Predictions created within the last `days_back` days, used by the
    /// sweep to re-register symbols from missed reactive triggers
    pub async fn recent_predictions(&self, days_back: u32) -> DataResult<Vec<Prediction>> {
        let rows: Vec<(Uuid, serde_json::Value, DateTime<Utc>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                r#"
                SELECT id, assets, created_at, source_published_at
                FROM predictions
                WHERE created_at > NOW() - ($1 || ' days')::interval
                ORDER BY created_at DESC
                "#,
            )
            .bind(days_back.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_prediction).collect()
    }

    pub async fn get_prediction(&self, id: Uuid) -> DataResult<Option<Prediction>> {
        let row: Option<(Uuid, serde_json::Value, DateTime<Utc>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                "SELECT id, assets, created_at, source_published_at FROM predictions WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_prediction).transpose()
    }

    fn row_to_prediction(
        row: (Uuid, serde_json::Value, DateTime<Utc>, Option<DateTime<Utc>>),
    ) -> DataResult<Prediction> {
        let (id, assets, created_at, source_published_at) = row;
        let assets: Vec<PredictedAsset> = serde_json::from_value(assets)?;

        Ok(Prediction {
            id,
            assets,
            created_at,
            source_published_at,
        })
    }
}
