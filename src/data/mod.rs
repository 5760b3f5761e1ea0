//! Market data module: provider clients, the fallback chain, and price storage
//! Provides comprehensive error handling and data validation

pub mod chain;
pub mod errors;
pub mod polygon;
pub mod provider;
pub mod store;
pub mod yahoo;

// Re-export commonly used types
pub use chain::{FailedSymbolCache, ProviderChain, ProviderStats};
pub use errors::{DataError, DataResult, ProviderFailure};
pub use polygon::PolygonProvider;
pub use provider::PriceProvider;
pub use store::{PriceRecord, PriceStore};
pub use yahoo::YahooProvider;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One daily bar as returned by a provider, before persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: Option<f64>,
    pub volume: i64,
    pub source: String,
}

/// Predicted direction for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    /// Position direction: +1 long, -1 short, 0 no position
    pub fn direction(&self) -> i8 {
        match self {
            Sentiment::Bullish => 1,
            Sentiment::Bearish => -1,
            Sentiment::Neutral => 0,
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Bullish => write!(f, "bullish"),
            Sentiment::Bearish => write!(f, "bearish"),
            Sentiment::Neutral => write!(f, "neutral"),
        }
    }
}

/// One (symbol, sentiment) pair inside a prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedAsset {
    pub symbol: String,
    pub sentiment: Sentiment,
}

/// Input boundary: a prediction persisted by the external analysis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub assets: Vec<PredictedAsset>,
    pub created_at: DateTime<Utc>,
    /// Publish time of the source content the prediction was derived from
    pub source_published_at: Option<DateTime<Utc>>,
}

impl Prediction {
    /// Reference date for measuring returns: the source content's publish
    /// time. Falls back to the prediction's own creation time only when the
    /// publish time is missing. Never the time the analysis job ran.
    pub fn anchor_date(&self) -> NaiveDate {
        self.source_published_at
            .unwrap_or(self.created_at)
            .date_naive()
    }
}

/// Validation helpers
pub mod validation {
    use super::*;

    pub const MAX_SYMBOL_LEN: usize = 20;

    /// Normalize a ticker symbol: trim and uppercase. Returns None for
    /// malformed input (empty, too long, interior whitespace).
    pub fn normalize_symbol(raw: &str) -> Option<String> {
        let symbol = raw.trim().to_uppercase();

        if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
            return None;
        }

        if symbol.chars().any(|c| c.is_whitespace()) {
            return None;
        }

        Some(symbol)
    }

    /// Validate a daily bar before persistence
    pub fn validate_bar(bar: &PriceBar) -> DataResult<()> {
        if normalize_symbol(&bar.symbol).is_none() {
            return Err(DataError::InvalidSymbol(bar.symbol.clone()));
        }

        if bar.open <= 0.0 || bar.high <= 0.0 || bar.low <= 0.0 || bar.close <= 0.0 {
            return Err(DataError::validation_error(
                "price",
                "Prices must be positive",
            ));
        }

        if bar.volume < 0 {
            return Err(DataError::validation_error(
                "volume",
                "Volume cannot be negative",
            ));
        }

        // Basic OHLC relationship validation
        if bar.high < bar.low {
            return Err(DataError::validation_error(
                "high_low",
                "High price cannot be less than low price",
            ));
        }

        if bar.high < bar.open.max(bar.close) {
            return Err(DataError::validation_error(
                "high",
                "High price should be >= open and close",
            ));
        }

        if bar.low > bar.open.min(bar.close) {
            return Err(DataError::validation_error(
                "low",
                "Low price should be <= open and close",
            ));
        }

        Ok(())
    }
}
