use crate::domain::ports::PriceHistoryProvider;
use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const MOCK_START_PRICE: f64 = 100.0;
const DAILY_DRIFT: f64 = 0.0003;
const DAILY_SHOCK: f64 = 0.02;

/// Deterministic geometric random walk starting at `start`.
pub fn random_walk(seed: u64, len: usize, start: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = start;
    (0..len)
        .map(|i| {
            if i > 0 {
                let shock: f64 = rng.random_range(-DAILY_SHOCK..DAILY_SHOCK);
                price = (price * (1.0 + DAILY_DRIFT + shock)).max(0.01);
            }
            price
        })
        .collect()
}

/// Synthetic prices: a seeded random walk per ticker, or a fixed series
/// registered with [`MockPriceHistory::set_series`].
#[derive(Clone)]
pub struct MockPriceHistory {
    seed: u64,
    series: Arc<RwLock<HashMap<String, Vec<f64>>>>,
}

impl MockPriceHistory {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            series: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set_series(&self, ticker: &str, prices: Vec<f64>) {
        self.series.write().await.insert(ticker.to_string(), prices);
    }

    fn ticker_seed(&self, ticker: &str) -> u64 {
        // FNV-1a, stable across runs
        ticker.bytes().fold(0xcbf2_9ce4_8422_2325 ^ self.seed, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        })
    }
}

impl Default for MockPriceHistory {
    fn default() -> Self {
        Self::new(7)
    }
}

#[async_trait]
impl PriceHistoryProvider for MockPriceHistory {
    async fn closing_prices(&self, ticker: &str, lookback: usize) -> Result<Vec<f64>> {
        if let Some(prices) = self.series.read().await.get(ticker) {
            let skip = prices.len().saturating_sub(lookback);
            return Ok(prices[skip..].to_vec());
        }
        if ticker.is_empty() {
            return Ok(Vec::new());
        }
        Ok(random_walk(self.ticker_seed(ticker), lookback, MOCK_START_PRICE))
    }
}
