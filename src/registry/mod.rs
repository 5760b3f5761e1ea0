//! Ticker lifecycle registry
//! Tracks every symbol ever observed, its status, and price-coverage metadata

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::data::{validation, DataError, DataResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickerStatus {
    Active,
    Inactive,
    Invalid,
}

impl TickerStatus {
    /// Guarded transitions: active → invalid (no data from any provider),
    /// active ⇄ inactive (operator action). invalid → active only through
    /// the explicit reset operation, never through this check.
    pub fn can_transition(self, to: TickerStatus) -> bool {
        matches!(
            (self, to),
            (TickerStatus::Active, TickerStatus::Invalid)
                | (TickerStatus::Active, TickerStatus::Inactive)
                | (TickerStatus::Inactive, TickerStatus::Active)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(TickerStatus::Active),
            "inactive" => Some(TickerStatus::Inactive),
            "invalid" => Some(TickerStatus::Invalid),
            _ => None,
        }
    }
}

impl std::fmt::Display for TickerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickerStatus::Active => write!(f, "ACTIVE"),
            TickerStatus::Inactive => write!(f, "INACTIVE"),
            TickerStatus::Invalid => write!(f, "INVALID"),
        }
    }
}

/// One row of `ticker_registry`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TickerEntry {
    pub id: Uuid,
    pub symbol: String,
    pub status: TickerStatus,
    pub status_reason: Option<String>,
    pub first_seen_date: NaiveDate,
    pub source_prediction_id: Option<Uuid>,
    pub last_price_update: Option<DateTime<Utc>>,
    pub price_data_start: Option<NaiveDate>,
    pub price_data_end: Option<NaiveDate>,
    pub total_price_records: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a batch registration call
#[derive(Debug, Clone, Default)]
pub struct RegistrationOutcome {
    pub newly_registered: Vec<String>,
    pub already_known: Vec<String>,
    /// Malformed inputs silently skipped (empty, too long, whitespace)
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistryStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub invalid: i64,
}

#[derive(Clone)]
pub struct TickerRegistry {
    pool: PgPool,
}

impl TickerRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register symbols, normalizing and skipping malformed ones. The
    /// symbol unique constraint is the single serialization point for
    /// concurrent registration: a conflicting insert from another worker
    /// resolves to "already known", never an error and never a duplicate.
    pub async fn register(
        &self,
        symbols: &[String],
        source_prediction_id: Option<Uuid>,
    ) -> DataResult<RegistrationOutcome> {
        let mut outcome = RegistrationOutcome::default();

        for raw in symbols {
            let symbol = match validation::normalize_symbol(raw) {
                Some(s) => s,
                None => {
                    warn!("Skipping malformed ticker symbol: {:?}", raw);
                    outcome.skipped.push(raw.clone());
                    continue;
                }
            };

            let result = sqlx::query(
                r#"
                INSERT INTO ticker_registry (symbol, status, first_seen_date, source_prediction_id)
                VALUES ($1, 'ACTIVE', CURRENT_DATE, $2)
                ON CONFLICT (symbol) DO NOTHING
                "#,
            )
            .bind(&symbol)
            .bind(source_prediction_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                info!("Registered new ticker {}", symbol);
                outcome.newly_registered.push(symbol);
            } else {
                outcome.already_known.push(symbol);
            }
        }

        Ok(outcome)
    }

    /// Set-difference against persisted symbols (after normalization)
    pub async fn get_unregistered(&self, symbols: &[String]) -> DataResult<Vec<String>> {
        let normalized: Vec<String> = symbols
            .iter()
            .filter_map(|s| validation::normalize_symbol(s))
            .collect();

        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let known: Vec<(String,)> =
            sqlx::query_as("SELECT symbol FROM ticker_registry WHERE symbol = ANY($1)")
                .bind(&normalized)
                .fetch_all(&self.pool)
                .await?;

        let known: std::collections::HashSet<String> =
            known.into_iter().map(|(s,)| s).collect();

        Ok(normalized
            .into_iter()
            .filter(|s| !known.contains(s))
            .collect())
    }

    pub async fn list_active(&self) -> DataResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT symbol FROM ticker_registry WHERE status = 'ACTIVE' ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn list(&self, status: Option<TickerStatus>) -> DataResult<Vec<TickerEntry>> {
        let entries = sqlx::query_as::<_, TickerEntry>(
            r#"
            SELECT id, symbol, status, status_reason, first_seen_date,
                   source_prediction_id, last_price_update, price_data_start,
                   price_data_end, total_price_records, created_at
            FROM ticker_registry
            WHERE $1::text IS NULL OR status = $1
            ORDER BY symbol
            "#,
        )
        .bind(status.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn get(&self, symbol: &str) -> DataResult<Option<TickerEntry>> {
        let entry = sqlx::query_as::<_, TickerEntry>(
            r#"
            SELECT id, symbol, status, status_reason, first_seen_date,
                   source_prediction_id, last_price_update, price_data_start,
                   price_data_end, total_price_records, created_at
            FROM ticker_registry
            WHERE symbol = $1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Mark a symbol invalid (provider chain definitively returned no
    /// data). Idempotent; a no-op if the symbol is unknown or already
    /// invalid.
    pub async fn mark_invalid(&self, symbol: &str, reason: &str) -> DataResult<()> {
        self.transition(symbol, TickerStatus::Invalid, Some(reason))
            .await
    }

    /// Operator action: retire a symbol without invalidating it
    pub async fn mark_inactive(&self, symbol: &str, reason: &str) -> DataResult<()> {
        self.transition(symbol, TickerStatus::Inactive, Some(reason))
            .await
    }

    /// Operator action: inactive → active
    pub async fn reactivate(&self, symbol: &str) -> DataResult<()> {
        self.transition(symbol, TickerStatus::Active, None).await
    }

    async fn transition(
        &self,
        symbol: &str,
        to: TickerStatus,
        reason: Option<&str>,
    ) -> DataResult<()> {
        let entry = match self.get(symbol).await? {
            Some(entry) => entry,
            None => {
                warn!("Status change for unknown ticker {} ignored", symbol);
                return Ok(());
            }
        };

        if entry.status == to {
            return Ok(());
        }

        if !entry.status.can_transition(to) {
            warn!(
                "Illegal ticker status transition {} → {} for {} ignored",
                entry.status, to, symbol
            );
            return Ok(());
        }

        sqlx::query("UPDATE ticker_registry SET status = $2, status_reason = $3 WHERE symbol = $1")
            .bind(symbol)
            .bind(to.to_string())
            .bind(reason)
            .execute(&self.pool)
            .await?;

        info!("Ticker {} moved {} → {}", symbol, entry.status, to);
        Ok(())
    }

    /// Explicit operator reset: invalid → active, clearing the reason.
    /// This is the only path out of invalid.
    pub async fn reset(&self, symbol: &str) -> DataResult<()> {
        let entry = self
            .get(symbol)
            .await?
            .ok_or_else(|| DataError::InvalidSymbol(symbol.to_string()))?;

        if entry.status != TickerStatus::Invalid {
            return Err(DataError::Internal(format!(
                "Ticker {} is {}, not INVALID; nothing to reset",
                symbol, entry.status
            )));
        }

        sqlx::query(
            "UPDATE ticker_registry SET status = 'ACTIVE', status_reason = NULL WHERE symbol = $1",
        )
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        info!("Ticker {} reset to ACTIVE", symbol);
        Ok(())
    }

    /// Recompute coverage metadata from the market_prices table
    pub async fn update_price_metadata(&self, symbol: &str) -> DataResult<()> {
        sqlx::query(
            r#"
            UPDATE ticker_registry SET
                price_data_start = sub.start_date,
                price_data_end = sub.end_date,
                total_price_records = sub.records,
                last_price_update = NOW()
            FROM (
                SELECT MIN(date) AS start_date, MAX(date) AS end_date, COUNT(*) AS records
                FROM market_prices WHERE symbol = $1
            ) sub
            WHERE ticker_registry.symbol = $1
            "#,
        )
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn stats(&self) -> DataResult<RegistryStats> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE status = 'ACTIVE'),
                   COUNT(*) FILTER (WHERE status = 'INACTIVE'),
                   COUNT(*) FILTER (WHERE status = 'INVALID')
            FROM ticker_registry
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RegistryStats {
            total: row.0,
            active: row.1,
            inactive: row.2,
            invalid: row.3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TickerStatus::*;

        assert!(Active.can_transition(Invalid));
        assert!(Active.can_transition(Inactive));
        assert!(Inactive.can_transition(Active));

        // invalid is terminal without an explicit reset
        assert!(!Invalid.can_transition(Active));
        assert!(!Invalid.can_transition(Inactive));
        assert!(!Inactive.can_transition(Invalid));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(TickerStatus::parse("active"), Some(TickerStatus::Active));
        assert_eq!(TickerStatus::parse("INVALID"), Some(TickerStatus::Invalid));
        assert_eq!(TickerStatus::parse("bogus"), None);
    }
}
