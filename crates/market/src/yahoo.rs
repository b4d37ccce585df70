//! Yahoo Finance chart API provider.
//!
//! Reads `meta` from `GET {base}/{symbol}?interval=1d&range=1d`. When the
//! market is closed and no live price is reported, the previous close is used
//! instead, so after-hours alerts still evaluate against the last close.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use url::Url;

use pricewatch_core::MarketSnapshot;

use crate::traits::{MarketDataProvider, MarketError};

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
    regular_market_volume: Option<f64>,
    regular_market_time: Option<i64>,
}

/// Fetches quotes from the Yahoo Finance chart endpoint.
#[derive(Debug, Clone)]
pub struct YahooChartProvider {
    base_url: Url,
    client: reqwest::Client,
}

impl YahooChartProvider {
    /// Create a provider against `base_url` (normally
    /// [`pricewatch_core::config::DEFAULT_MARKET_BASE_URL`]). Returns [`MarketError::Config`] if the
    /// URL cannot be used as a base.
    pub fn new(base_url: &str) -> Result<Self, MarketError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| MarketError::Config(format!("invalid market base URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(MarketError::Config(format!(
                "market base URL cannot be a base: {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("pricewatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { base_url, client })
    }

    fn chart_url(&self, symbol: &str) -> Result<Url, MarketError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MarketError::Config("market base URL cannot be a base".into()))?
            .pop_if_empty()
            .push(symbol);
        url.query_pairs_mut()
            .append_pair("interval", "1d")
            .append_pair("range", "1d");
        Ok(url)
    }
}

/// Turn a chart response body into a snapshot.
fn parse_chart(
    symbol: &str,
    body: &str,
    fetched_at: DateTime<Utc>,
) -> Result<MarketSnapshot, MarketError> {
    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| MarketError::Malformed(e.to_string()))?;

    if let Some(err) = response.chart.error {
        return Err(MarketError::NoData {
            symbol: symbol.to_string(),
            reason: err
                .description
                .or(err.code)
                .unwrap_or_else(|| "unknown error".to_string()),
        });
    }

    let meta = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .map(|r| r.meta)
        .ok_or_else(|| MarketError::NoData {
            symbol: symbol.to_string(),
            reason: "empty result".to_string(),
        })?;

    let price = meta
        .regular_market_price
        .or(meta.previous_close)
        .or(meta.chart_previous_close)
        .ok_or_else(|| MarketError::NoData {
            symbol: symbol.to_string(),
            reason: "no price in response".to_string(),
        })?;

    let observed_at = meta
        .regular_market_time
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or(fetched_at);

    Ok(MarketSnapshot {
        symbol: symbol.to_string(),
        price,
        // Unreported volume is NaN; volume-gated rules evaluate as indeterminate.
        volume: meta.regular_market_volume.unwrap_or(f64::NAN),
        observed_at,
    })
}

#[async_trait::async_trait]
impl MarketDataProvider for YahooChartProvider {
    async fn get_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError> {
        let url = self.chart_url(symbol)?;
        tracing::debug!(%symbol, %url, "Fetching quote");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // Yahoo reports unknown symbols as 404 with a JSON error body.
        if !status.is_success() {
            return match parse_chart(symbol, &body, Utc::now()) {
                Err(e @ MarketError::NoData { .. }) => Err(e),
                _ => Err(MarketError::Status {
                    symbol: symbol.to_string(),
                    status: status.as_u16(),
                }),
            };
        }

        parse_chart(symbol, &body, Utc::now())
    }

    fn provider_name(&self) -> &str {
        "yahoo"
    }
}
