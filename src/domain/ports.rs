use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of closing prices for a ticker, oldest first.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    /// Returns up to `lookback` most recent closing prices in time order.
    async fn closing_prices(&self, ticker: &str, lookback: usize) -> Result<Vec<f64>>;
}

/// Durable storage for opaque model blobs keyed by model name.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn save(&self, name: &str, blob: &[u8]) -> Result<()>;
    /// `Ok(None)` when nothing has been stored under `name`.
    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Time source used by anything that expires.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
