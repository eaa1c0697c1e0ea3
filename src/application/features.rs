use crate::application::indicators::calculate_indicators;
use crate::domain::types::{FeatureVector, IndicatorSet};

/// Ranges narrower than this normalize to the midpoint.
const MIN_RANGE: f64 = 1e-6;

/// Reference bound for MACD normalization.
const MACD_BOUND: f64 = 10.0;

/// Price windows narrower than this are treated as flat.
pub const MIN_WINDOW_RANGE: f64 = 0.01;

/// Volatility reference as a fraction of the window maximum.
pub const VOLATILITY_REF_RATIO: f64 = 0.1;

/// Min-max normalization with a degenerate-range guard.
///
/// Returns 0.5 if either bound is non-finite, the bounds are equal, or the
/// range is below 1e-6.
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if !min.is_finite() || !max.is_finite() || max == min {
        return 0.5;
    }
    let range = max - min;
    if range < MIN_RANGE {
        return 0.5;
    }
    (value - min) / range
}

/// Build the 8-feature vector for one time step.
///
/// Price-scale indicators are normalized against `[min_price, max_price]`.
pub fn build_feature_vector(
    price: f64,
    indicators: &IndicatorSet,
    min_price: f64,
    max_price: f64,
    max_volatility_ref: f64,
) -> FeatureVector {
    [
        normalize(price, min_price, max_price),
        normalize(indicators.sma5, min_price, max_price),
        normalize(indicators.sma10, min_price, max_price),
        normalize(indicators.rsi, 0.0, 100.0),
        normalize(indicators.macd, -MACD_BOUND, MACD_BOUND),
        normalize(indicators.ema12, min_price, max_price),
        normalize(indicators.ema26, min_price, max_price),
        normalize(indicators.volatility, 0.0, max_volatility_ref),
    ]
}

/// Minimum and maximum of a price window, `None` when empty.
pub fn price_bounds(window: &[f64]) -> Option<(f64, f64)> {
    if window.is_empty() {
        return None;
    }
    let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some((min, max))
}

/// Build one feature vector per step of `window`.
///
/// Step `k` uses indicators computed over `window[..=k]` only, so a
/// sequence never looks ahead of its own time step.
pub fn build_feature_sequence(
    window: &[f64],
    min_price: f64,
    max_price: f64,
) -> Vec<FeatureVector> {
    let max_volatility_ref = max_price * VOLATILITY_REF_RATIO;

    window
        .iter()
        .enumerate()
        .map(|(idx, &price)| {
            let indicators = calculate_indicators(&window[..=idx]);
            build_feature_vector(price, &indicators, min_price, max_price, max_volatility_ref)
        })
        .collect()
}
