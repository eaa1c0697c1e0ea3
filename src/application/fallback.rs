//! Closed-form statistical forecast
//!
//! Used whenever the sequence model is unavailable. Needs no trained state
//! and never fails on non-empty input.

use crate::application::indicators::calculate_indicators;
use crate::domain::types::{Direction, PredictionMethod, PredictionResult, round_confidence};

/// Below this many prices the forecast simply echoes the last price.
pub const MIN_STATISTICAL_POINTS: usize = 5;

const RECENT_WINDOW: usize = 10;
const MOMENTUM_SPAN: usize = 3;
const TREND_WEIGHT: f64 = 0.3;
const MOMENTUM_WEIGHT: f64 = 0.2;
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_CORRECTION: f64 = 0.02;
const MACD_WEIGHT: f64 = 0.1;

const BASE_CONFIDENCE: f64 = 70.0;
pub const MIN_CONFIDENCE: f64 = 50.0;
pub const MAX_CONFIDENCE: f64 = 85.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct StatisticalFallbackPredictor;

impl StatisticalFallbackPredictor {
    pub fn new() -> Self {
        Self
    }

    /// Forecast from trend, momentum and indicator nudges.
    ///
    /// Returns `None` only for an empty series.
    pub fn predict(&self, prices: &[f64]) -> Option<PredictionResult> {
        let &current = prices.last()?;
        let indicators = calculate_indicators(prices);

        if prices.len() < MIN_STATISTICAL_POINTS {
            return Some(PredictionResult {
                predicted_price: current,
                confidence: MIN_CONFIDENCE,
                direction: Direction::Flat,
                volatility: 0.0,
                indicators,
                method: PredictionMethod::StatisticalMinimal,
            });
        }

        let recent = &prices[prices.len().saturating_sub(RECENT_WINDOW)..];
        let trend = recent[recent.len() - 1] - recent[0];
        let momentum =
            mean(&recent[recent.len() - MOMENTUM_SPAN..]) - mean(&recent[..MOMENTUM_SPAN]);

        let mut prediction = current + trend * TREND_WEIGHT + momentum * MOMENTUM_WEIGHT;

        if indicators.rsi > RSI_OVERBOUGHT {
            prediction -= current * RSI_CORRECTION;
        } else if indicators.rsi < RSI_OVERSOLD {
            prediction += current * RSI_CORRECTION;
        }
        prediction += indicators.macd * MACD_WEIGHT;

        let volatility = indicators.volatility;
        let volatility_ratio = if current != 0.0 { volatility / current } else { 0.0 };
        let confidence =
            (BASE_CONFIDENCE - volatility_ratio * 100.0).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);

        Some(PredictionResult {
            predicted_price: prediction,
            confidence: round_confidence(confidence),
            direction: Direction::of_move(prediction, current),
            volatility,
            indicators,
            method: PredictionMethod::Statistical,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
