use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use super::provider::PriceProvider;
use super::{DataError, DataResult, PriceBar};

/// Yahoo Finance v8 chart API response structures
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooChartResult>>,
    error: Option<YahooApiError>,
}

#[derive(Debug, Deserialize)]
struct YahooChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct YahooAdjClose {
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct YahooApiError {
    code: String,
    description: String,
}

/// Yahoo Finance chart API provider. Keyless, used as the fallback after
/// Polygon exhausts its retry budget.
pub struct YahooProvider {
    client: reqwest::Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(timeout_seconds: u64) -> DataResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .user_agent("tickerpulse/0.1.0")
            .build()
            .map_err(DataError::Network)?;

        Ok(Self {
            client,
            base_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
        })
    }
}

#[async_trait]
impl PriceProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DataResult<Vec<PriceBar>> {
        // period2 is exclusive, so push it one day past the requested end
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| DataError::parse_error("invalid start date"))?
            .and_utc()
            .timestamp();
        let period2 = (end + chrono::Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| DataError::parse_error("invalid end date"))?
            .and_utc()
            .timestamp();

        let url = format!(
            "{}/{}?period1={}&period2={}&interval=1d&events=history",
            self.base_url, symbol, period1, period2
        );

        debug!("Yahoo chart request: GET {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();

            // Yahoo answers 404 for unknown symbols; that is "no data",
            // not a transport failure.
            if status_code == 404 {
                return Ok(Vec::new());
            }

            if status_code == 429 {
                return Err(DataError::RateLimit { retry_after: 60 });
            }

            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(DataError::Api {
                status_code,
                message: format!("Yahoo Finance: {}", error_text),
            });
        }

        let chart_response: YahooChartResponse = response.json().await?;

        if let Some(err) = chart_response.chart.error {
            return Err(DataError::Api {
                status_code: 400,
                message: format!("Yahoo Finance: {} ({})", err.description, err.code),
            });
        }

        let result = match chart_response
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        {
            Some(result) => result,
            None => return Ok(Vec::new()),
        };

        let timestamps = result.timestamp.unwrap_or_default();
        let quote = result
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::parse_error("Yahoo response missing quote block"))?;
        let adjclose = result
            .indicators
            .adjclose
            .and_then(|mut a| if a.is_empty() { None } else { Some(a.remove(0)) });

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            // Yahoo pads series with nulls on halts; skip incomplete rows
            let (open, high, low, close) = match (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            ) {
                (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
                _ => continue,
            };

            let date = DateTime::from_timestamp(*ts, 0)
                .ok_or_else(|| DataError::Parse {
                    message: format!("Invalid timestamp: {}", ts),
                })?
                .date_naive();

            bars.push(PriceBar {
                symbol: symbol.to_string(),
                date,
                open,
                high,
                low,
                close,
                adjusted_close: adjclose
                    .as_ref()
                    .and_then(|a| a.adjclose.get(i).copied().flatten()),
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
                source: "yahoo".to_string(),
            });
        }

        debug!("Fetched {} daily bars from Yahoo for {}", bars.len(), symbol);

        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_response_parsing_skips_null_rows() {
        let body = r#"{
            "chart": {
                "result": [{
                    "meta": {"symbol": "SPY"},
                    "timestamp": [1704207600, 1704294000, 1704380400],
                    "indicators": {
                        "quote": [{
                            "open": [470.1, null, 472.3],
                            "high": [472.0, null, 474.0],
                            "low": [469.5, null, 471.1],
                            "close": [471.2, null, 473.5],
                            "volume": [81964874, null, 72899183]
                        }],
                        "adjclose": [{"adjclose": [470.9, null, 473.2]}]
                    }
                }],
                "error": null
            }
        }"#;

        let parsed: YahooChartResponse = serde_json::from_str(body).unwrap();
        let result = parsed.chart.result.unwrap().remove(0);
        assert_eq!(result.timestamp.unwrap().len(), 3);
    }

    #[test]
    fn test_chart_error_parsing() {
        let body = r#"{
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        }"#;

        let parsed: YahooChartResponse = serde_json::from_str(body).unwrap();
        let err = parsed.chart.error.unwrap();
        assert_eq!(err.code, "Not Found");
        assert!(err.description.contains("delisted"));
    }
}
