//! Market data provider trait and error types.

use pricewatch_core::MarketSnapshot;

/// Errors from a market data lookup. A lookup that fails must surface one of
/// these rather than a zero-valued snapshot.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Quote source returned {status} for {symbol}")]
    Status { symbol: String, status: u16 },

    #[error("No quote available for {symbol}: {reason}")]
    NoData { symbol: String, reason: String },

    #[error("Malformed quote response: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Source of current price/volume for a symbol.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError>;

    /// Human-readable provider name (e.g., "yahoo").
    fn provider_name(&self) -> &str;
}
