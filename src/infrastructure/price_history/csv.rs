use crate::domain::ports::PriceHistoryProvider;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// One row of a `{ticker}.csv` price file.
#[derive(Debug, Deserialize)]
struct PriceRecord {
    timestamp: String,
    close: f64,
}

/// Reads `timestamp,close` files from a directory, one file per ticker.
///
/// Timestamps are RFC 3339 or `YYYY-MM-DD` and must be non-decreasing.
/// Closing prices must be finite and positive.
pub struct CsvPriceHistory {
    dir: PathBuf,
}

impl CsvPriceHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, ticker: &str) -> Result<PathBuf> {
        if ticker.is_empty()
            || !ticker
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            bail!("Invalid ticker for CSV lookup: {:?}", ticker);
        }
        Ok(self.dir.join(format!("{}.csv", ticker)))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Unrecognized timestamp {:?}", raw))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Parse CSV contents into closing prices, oldest first.
pub(crate) fn parse_closing_prices(contents: &[u8]) -> Result<Vec<f64>> {
    let mut rdr = csv::Reader::from_reader(contents);
    let mut prices = Vec::new();
    let mut last_ts: Option<DateTime<Utc>> = None;

    for (row, result) in rdr.deserialize().enumerate() {
        let record: PriceRecord = result.with_context(|| format!("Malformed row {}", row + 1))?;
        let ts = parse_timestamp(&record.timestamp)?;

        if let Some(prev) = last_ts
            && ts < prev
        {
            bail!("Row {}: timestamp {} is earlier than {}", row + 1, ts, prev);
        }
        if !record.close.is_finite() || record.close <= 0.0 {
            bail!("Row {}: invalid closing price {}", row + 1, record.close);
        }

        last_ts = Some(ts);
        prices.push(record.close);
    }

    Ok(prices)
}

#[async_trait]
impl PriceHistoryProvider for CsvPriceHistory {
    async fn closing_prices(&self, ticker: &str, lookback: usize) -> Result<Vec<f64>> {
        let path = self.path_for(ticker)?;
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No price file for {} at {:?}", ticker, path);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read price file {:?}", path));
            }
        };

        let mut prices = parse_closing_prices(&contents)
            .with_context(|| format!("Invalid price file {:?}", path))?;

        if prices.len() > lookback {
            prices.drain(..prices.len() - lookback);
        }
        Ok(prices)
    }
}
