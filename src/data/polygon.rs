use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::provider::PriceProvider;
use super::{DataError, DataResult, PriceBar};

/// Polygon.io API response structures
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct PolygonAggregatesResponse {
    ticker: Option<String>,
    #[serde(rename = "queryCount")]
    query_count: Option<i64>,
    #[serde(rename = "resultsCount")]
    results_count: Option<i64>,
    adjusted: Option<bool>,
    results: Option<Vec<PolygonAggregate>>,
    status: String,
    #[serde(rename = "next_url")]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct PolygonAggregate {
    #[serde(rename = "v")]
    volume: f64, // Polygon sometimes returns volume as float
    #[serde(rename = "vw")]
    vwap: Option<f64>,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "t")]
    timestamp: i64, // Unix milliseconds
    #[serde(rename = "n")]
    transactions: Option<i64>,
}

/// Rate limiter for API calls (token bucket algorithm)
struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: DateTime<Utc>,
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: Utc::now(),
        }
    }

    fn refill(&mut self) {
        let now = Utc::now();
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Seconds until a token is available (0.0 if one is ready)
    fn time_until_token(&mut self) -> f64 {
        self.refill();
        if self.tokens >= 1.0 {
            0.0
        } else {
            (1.0 - self.tokens) / self.refill_rate
        }
    }

    fn consume(&mut self) {
        self.refill();
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}

/// Polygon.io daily aggregates provider (primary source)
pub struct PolygonProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl PolygonProvider {
    pub fn new(api_key: String, timeout_seconds: u64) -> DataResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .user_agent("tickerpulse/0.1.0")
            .build()
            .map_err(DataError::Network)?;

        // Free tier allows 5 calls per minute; allow a burst of 5 and
        // refill at 5/60 tokens per second.
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(5.0, 5.0 / 60.0)));

        Ok(Self {
            client,
            api_key,
            base_url: "https://api.polygon.io".to_string(),
            rate_limiter,
        })
    }

    async fn wait_for_rate_limit(&self) {
        let mut limiter = self.rate_limiter.lock().await;
        let wait_time = limiter.time_until_token();
        if wait_time > 0.0 {
            debug!(
                "Polygon rate limit: waiting {:.1}s before making API call",
                wait_time
            );
            drop(limiter); // Release lock while waiting
            tokio::time::sleep(tokio::time::Duration::from_secs_f64(wait_time)).await;
            limiter = self.rate_limiter.lock().await;
        }
        limiter.consume();
    }
}

#[async_trait]
impl PriceProvider for PolygonProvider {
    fn name(&self) -> &'static str {
        "polygon"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<Vec<PriceBar>> {
        self.wait_for_rate_limit().await;

        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}?adjusted=true&sort=asc&apiKey={}",
            self.base_url,
            symbol,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            self.api_key
        );

        debug!(
            "Polygon API request: GET {}",
            url.replace(&self.api_key, "***")
        );

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if status_code == 429 {
                return Err(DataError::RateLimit { retry_after: 60 });
            }

            return Err(DataError::Api {
                status_code,
                message: format!("Polygon.io: {}", error_text),
            });
        }

        let polygon_response: PolygonAggregatesResponse = response.json().await?;

        // DELAYED is returned for free/basic tier subscriptions; the data
        // itself is still valid daily history.
        match polygon_response.status.as_str() {
            "OK" => {}
            "DELAYED" => {
                warn!("Polygon.io status: DELAYED (free/basic tier data)");
            }
            status => {
                return Err(DataError::Internal(format!(
                    "Polygon.io returned error status: {}",
                    status
                )));
            }
        }

        let results = polygon_response.results.unwrap_or_default();

        let mut bars = Vec::with_capacity(results.len());
        for agg in results {
            let datetime =
                DateTime::from_timestamp_millis(agg.timestamp).ok_or_else(|| DataError::Parse {
                    message: format!("Invalid timestamp: {}", agg.timestamp),
                })?;

            bars.push(PriceBar {
                symbol: symbol.to_string(),
                date: datetime.date_naive(),
                open: agg.open,
                high: agg.high,
                low: agg.low,
                close: agg.close,
                // Polygon aggregates are already split-adjusted when
                // adjusted=true is requested.
                adjusted_close: Some(agg.close),
                volume: agg.volume as i64,
                source: "polygon".to_string(),
            });
        }

        debug!("Fetched {} daily bars from Polygon.io for {}", bars.len(), symbol);

        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_consumes_and_refills() {
        let mut limiter = RateLimiter::new(2.0, 100.0);
        assert_eq!(limiter.time_until_token(), 0.0);
        limiter.consume();
        limiter.consume();
        // Burst exhausted; refill rate is high enough that the wait is
        // small but nonzero immediately after draining.
        assert!(limiter.time_until_token() < 0.1);
    }

    #[test]
    fn test_aggregate_response_parsing() {
        let body = r#"{
            "ticker": "AAPL",
            "queryCount": 2,
            "resultsCount": 2,
            "adjusted": true,
            "status": "DELAYED",
            "results": [
                {"v": 70790813.0, "vw": 131.6292, "o": 130.465, "c": 130.15, "h": 133.41, "l": 129.89, "t": 1673251200000, "n": 645365},
                {"v": 63896155.0, "vw": 131.6087, "o": 130.26, "c": 131.25, "h": 131.2636, "l": 128.12, "t": 1673337600000, "n": 554940}
            ]
        }"#;

        let parsed: PolygonAggregatesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.status, "DELAYED");
        let results = parsed.results.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].close, 130.15);
    }
}
