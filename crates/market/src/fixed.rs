//! Static quote source for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use pricewatch_core::MarketSnapshot;

use crate::traits::{MarketDataProvider, MarketError};

/// Serves quotes set with [`StaticMarketData::set_quote`]. Unknown symbols
/// produce [`MarketError::NoData`]. Clones share the same quotes.
#[derive(Debug, Clone, Default)]
pub struct StaticMarketData {
    quotes: Arc<RwLock<HashMap<String, (f64, f64)>>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the price and volume served for `symbol`.
    pub fn set_quote(&self, symbol: &str, price: f64, volume: f64) {
        let mut guard = self.quotes.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(symbol.to_string(), (price, volume));
    }

    pub fn remove_quote(&self, symbol: &str) {
        let mut guard = self.quotes.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(symbol);
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn get_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError> {
        let quote = {
            let guard = self.quotes.read().unwrap_or_else(|e| e.into_inner());
            guard.get(symbol).copied()
        };
        let (price, volume) = quote.ok_or_else(|| MarketError::NoData {
            symbol: symbol.to_string(),
            reason: "no static quote".to_string(),
        })?;
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price,
            volume,
            observed_at: Utc::now(),
        })
    }

    fn provider_name(&self) -> &str {
        "static"
    }
}
