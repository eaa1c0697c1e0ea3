//! Technical indicators over a closing-price series
//!
//! Every function is total: short or empty input yields a documented default
//! instead of an error, so [`calculate_indicators`] always returns a complete
//! [`IndicatorSet`].
//!
//! Averages deliberately anchor to the most recent price when the series is
//! shorter than the period, rather than averaging fewer points.

use crate::domain::types::IndicatorSet;
use statrs::statistics::Statistics;

pub const RSI_PERIOD: usize = 14;
pub const VOLATILITY_PERIOD: usize = 20;

/// Compute the full indicator set for `prices`.
pub fn calculate_indicators(prices: &[f64]) -> IndicatorSet {
    if prices.is_empty() {
        return IndicatorSet::default();
    }

    IndicatorSet {
        sma5: sma(prices, 5),
        sma10: sma(prices, 10),
        sma20: sma(prices, 20),
        ema12: ema(prices, 12),
        ema26: ema(prices, 26),
        rsi: rsi(prices, RSI_PERIOD),
        macd: macd(prices),
        volatility: volatility(prices, VOLATILITY_PERIOD),
    }
}

/// Simple moving average of the last `period` prices.
///
/// Returns the last price when fewer than `period` points exist, and 0 for
/// an empty series.
pub fn sma(prices: &[f64], period: usize) -> f64 {
    let Some(&last) = prices.last() else {
        return 0.0;
    };
    if period == 0 || prices.len() < period {
        return last;
    }

    let window = &prices[prices.len() - period..];
    window.iter().sum::<f64>() / period as f64
}

/// Exponential moving average with multiplier `2 / (period + 1)`.
///
/// Seeded with the SMA of the first `period` prices, then updated over the
/// remainder.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    let Some(&last) = prices.last() else {
        return 0.0;
    };
    if period == 0 || prices.len() < period {
        return last;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = sma(&prices[..period], period);

    prices[period..]
        .iter()
        .fold(seed, |ema, &price| (price - ema) * multiplier + ema)
}

/// Relative Strength Index over the last `period` deltas.
///
/// Needs `period + 1` prices, otherwise neutral 50. A window without losses
/// reads 100.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in prices[prices.len() - period - 1..].windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// MACD line: EMA(12) - EMA(26) over the full series.
pub fn macd(prices: &[f64]) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    ema(prices, 12) - ema(prices, 26)
}

/// Population standard deviation of the last `min(period, len)` prices.
pub fn volatility(prices: &[f64], period: usize) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }

    let start = prices.len().saturating_sub(period.max(2));
    let std_dev = prices[start..].iter().population_std_dev();
    if std_dev.is_finite() { std_dev } else { 0.0 }
}
