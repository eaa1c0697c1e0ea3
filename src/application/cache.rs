use crate::domain::ports::Clock;
use crate::domain::types::PredictionResult;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Most recent prediction for one ticker
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub ticker: String,
    pub result: Arc<PredictionResult>,
    pub created_at: DateTime<Utc>,
}

/// Per-ticker TTL cache of prediction results.
///
/// Holds at most one entry per ticker. Entries older than the TTL are
/// treated as misses and evicted on lookup.
pub struct PredictionCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PredictionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionCache")
            .field("entries", &"<RwLock>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl PredictionCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            clock,
        }
    }

    /// Fresh cached result for `ticker`, if any.
    pub fn get(&self, ticker: &str) -> Option<Arc<PredictionResult>> {
        let now = self.clock.now();
        {
            let guard = match self.entries.read() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.get(ticker) {
                None => return None,
                Some(entry) if now - entry.created_at < self.ttl => {
                    return Some(entry.result.clone());
                }
                Some(_) => {}
            }
        }

        debug!("PredictionCache: entry for {} expired, evicting", ticker);
        self.evict_if_stale(ticker, now);
        None
    }

    /// Store `result`, replacing any prior entry for `ticker`.
    pub fn set(&self, ticker: &str, result: Arc<PredictionResult>) {
        let entry = CacheEntry {
            ticker: ticker.to_string(),
            result,
            created_at: self.clock.now(),
        };

        match self.entries.write() {
            Ok(mut guard) => {
                guard.insert(ticker.to_string(), entry);
            }
            Err(poisoned) => {
                tracing::error!("PredictionCache: Lock poisoned during write, recovering");
                poisoned.into_inner().insert(ticker.to_string(), entry);
            }
        }
    }

    /// Remove the entry for `ticker`. Returns whether one existed.
    pub fn invalidate(&self, ticker: &str) -> bool {
        let removed = match self.entries.write() {
            Ok(mut guard) => guard.remove(ticker),
            Err(poisoned) => poisoned.into_inner().remove(ticker),
        };
        if removed.is_some() {
            debug!("PredictionCache: cleared prediction cache for {}", ticker);
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_if_stale(&self, ticker: &str, now: DateTime<Utc>) {
        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A concurrent set may have refreshed the entry in between
        if guard
            .get(ticker)
            .is_some_and(|entry| now - entry.created_at >= self.ttl)
        {
            guard.remove(ticker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Direction, IndicatorSet, PredictionMethod};
    use crate::infrastructure::clock::ManualClock;

    fn sample_result(price: f64) -> Arc<PredictionResult> {
        Arc::new(PredictionResult {
            predicted_price: price,
            confidence: 70.0,
            direction: Direction::Up,
            volatility: 1.0,
            indicators: IndicatorSet::default(),
            method: PredictionMethod::Statistical,
        })
    }

    fn cache_with_clock() -> (PredictionCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (PredictionCache::new(DEFAULT_CACHE_TTL, clock.clone()), clock)
    }

    #[test]
    fn test_get_returns_same_instance_within_ttl() {
        let (cache, clock) = cache_with_clock();
        let result = sample_result(101.0);
        cache.set("AAPL", result.clone());

        clock.advance(Duration::from_secs(299));
        let cached = cache.get("AAPL").unwrap();
        assert!(Arc::ptr_eq(&cached, &result));
    }

    #[test]
    fn test_entry_expires_at_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set("AAPL", sample_result(101.0));

        clock.advance(Duration::from_secs(300));
        assert!(cache.get("AAPL").is_none());
        assert!(cache.is_empty(), "stale entry should be evicted lazily");
    }

    #[test]
    fn test_set_overwrites_prior_entry() {
        let (cache, _clock) = cache_with_clock();
        cache.set("MSFT", sample_result(1.0));
        cache.set("MSFT", sample_result(2.0));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("MSFT").unwrap().predicted_price, 2.0);
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let (cache, _clock) = cache_with_clock();
        cache.set("TSLA", sample_result(1.0));

        assert!(cache.invalidate("TSLA"));
        assert!(cache.get("TSLA").is_none());
        assert!(!cache.invalidate("TSLA"));
    }

    #[test]
    fn test_tickers_are_independent() {
        let (cache, clock) = cache_with_clock();
        cache.set("A", sample_result(1.0));
        clock.advance(Duration::from_secs(200));
        cache.set("B", sample_result(2.0));
        clock.advance(Duration::from_secs(150));

        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
    }
}
