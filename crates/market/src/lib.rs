//! Market data lookup for alert evaluation.
//!
//! This crate provides:
//! - `MarketDataProvider` trait for pluggable quote sources
//! - A Yahoo Finance chart API provider
//! - A static in-memory provider for tests and dry runs

pub mod fixed;
pub mod traits;
pub mod yahoo;

pub use fixed::StaticMarketData;
pub use traits::{MarketDataProvider, MarketError};
pub use yahoo::YahooChartProvider;
