use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, warn};

use super::{validation, DataResult, PriceBar};

/// One persisted (symbol, trading date) row from `market_prices`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceRecord {
    pub id: i64,
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: Option<f64>,
    pub volume: i64,
    pub source_provider: String,
    pub created_at: DateTime<Utc>,
}

/// Coverage summary for one symbol
#[derive(Debug, Clone, Copy)]
pub struct PriceCoverage {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub records: i64,
}

/// Persistence for daily bars. All writes are idempotent upserts keyed on
/// (symbol, date); re-fetching a stored date never duplicates a row.
#[derive(Clone)]
pub struct PriceStore {
    pool: PgPool,
}

impl PriceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of bars. Bars failing validation are skipped per
    /// record with a warning, not per batch. Returns the number written.
    pub async fn upsert_bars(&self, bars: &[PriceBar]) -> DataResult<usize> {
        let mut count = 0;

        for bar in bars {
            if let Err(err) = validation::validate_bar(bar) {
                warn!(
                    "Skipping invalid bar for {} on {}: {}",
                    bar.symbol, bar.date, err
                );
                continue;
            }

            let result = sqlx::query(
                r#"
                INSERT INTO market_prices
                    (symbol, date, open, high, low, close, adjusted_close, volume, source_provider)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (symbol, date)
                DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    adjusted_close = EXCLUDED.adjusted_close,
                    volume = EXCLUDED.volume,
                    source_provider = EXCLUDED.source_provider
                "#,
            )
            .bind(&bar.symbol)
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.adjusted_close)
            .bind(bar.volume)
            .bind(&bar.source)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                count += 1;
            }
        }

        debug!("Upserted {} price records", count);
        Ok(count)
    }

    /// Date-ordered series for a symbol, optionally from a start date
    pub async fn get_series(
        &self,
        symbol: &str,
        from: Option<NaiveDate>,
    ) -> DataResult<Vec<PriceRecord>> {
        let records = sqlx::query_as::<_, PriceRecord>(
            r#"
            SELECT id, symbol, date, open, high, low, close,
                   adjusted_close, volume, source_provider, created_at
            FROM market_prices
            WHERE symbol = $1 AND ($2::date IS NULL OR date >= $2)
            ORDER BY date ASC
            "#,
        )
        .bind(symbol)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// min/max/count of stored dates for a symbol; None when nothing stored
    pub async fn coverage(&self, symbol: &str) -> DataResult<Option<PriceCoverage>> {
        let row: (Option<NaiveDate>, Option<NaiveDate>, i64) = sqlx::query_as(
            "SELECT MIN(date), MAX(date), COUNT(*) FROM market_prices WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;

        Ok(match row {
            (Some(start), Some(end), records) => Some(PriceCoverage {
                start,
                end,
                records,
            }),
            _ => None,
        })
    }

    /// Most recent stored trading date for a symbol
    pub async fn latest_date(&self, symbol: &str) -> DataResult<Option<NaiveDate>> {
        let row: (Option<NaiveDate>,) =
            sqlx::query_as("SELECT MAX(date) FROM market_prices WHERE symbol = $1")
                .bind(symbol)
                .fetch_one(&self.pool)
                .await?;

        Ok(row.0)
    }
}
