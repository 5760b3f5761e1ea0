use async_trait::async_trait;
use chrono::NaiveDate;

use super::{DataResult, PriceBar};

/// A source of daily OHLCV history. The chain holds an ordered list of
/// these and never a concrete provider type.
///
/// Implementations must map transport failures onto the `DataError`
/// taxonomy so the chain can tell retryable failures (timeouts, rate
/// limits, 5xx) from terminal ones (bad symbol, 404, auth).
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Stable name used in logs, health reports, and `source_provider`
    fn name(&self) -> &'static str;

    /// Fetch daily bars for the inclusive date range. An empty Vec means
    /// the provider answered but has no data for the symbol; that is not
    /// a transport error.
    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<Vec<PriceBar>>;

    /// Cheap canary request used by the health monitor. Default: fetch a
    /// week of SPY and discard the result.
    async fn probe(&self) -> DataResult<()> {
        let end = chrono::Utc::now().date_naive();
        let start = end - chrono::Duration::days(7);
        self.fetch_daily("SPY", start, end).await.map(|_| ())
    }
}
