use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of features in every [`FeatureVector`].
pub const FEATURE_COUNT: usize = 8;

/// One normalized time step fed to the sequence model.
///
/// Order: price, sma5, sma10, rsi, macd, ema12, ema26, volatility.
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Technical indicators computed over a price series.
///
/// Always fully populated: insufficient history substitutes defaults
/// (the last price for averages, 50 for RSI, 0 for MACD and volatility).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma5: f64,
    pub sma10: f64,
    pub sma20: f64,
    pub ema12: f64,
    pub ema26: f64,
    pub rsi: f64,
    pub macd: f64,
    pub volatility: f64,
}

impl Default for IndicatorSet {
    fn default() -> Self {
        Self {
            sma5: 0.0,
            sma10: 0.0,
            sma20: 0.0,
            ema12: 0.0,
            ema26: 0.0,
            rsi: 50.0,
            macd: 0.0,
            volatility: 0.0,
        }
    }
}

/// A fixed-length feature sequence and its normalized next-price target.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub sequence: Vec<FeatureVector>,
    pub target: f64,
}

/// Lifecycle of the sequence model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModelState {
    #[default]
    Untrained,
    Training,
    Ready,
    Failed(String),
}

impl ModelState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Ready)
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Untrained => write!(f, "untrained"),
            ModelState::Training => write!(f, "training"),
            ModelState::Ready => write!(f, "ready"),
            ModelState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Strict comparison of a predicted price against the current one.
    pub fn of_move(predicted: f64, current: f64) -> Self {
        if predicted > current {
            Direction::Up
        } else if predicted < current {
            Direction::Down
        } else {
            Direction::Flat
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::Flat => write!(f, "flat"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionMethod {
    #[serde(rename = "ml")]
    Ml,
    #[serde(rename = "statistical")]
    Statistical,
    #[serde(rename = "statistical-minimal")]
    StatisticalMinimal,
}

impl fmt::Display for PredictionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionMethod::Ml => write!(f, "ml"),
            PredictionMethod::Statistical => write!(f, "statistical"),
            PredictionMethod::StatisticalMinimal => write!(f, "statistical-minimal"),
        }
    }
}

/// Short-horizon forecast for a single ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub predicted_price: f64,
    /// Percentage in [50, 95], rounded to one decimal.
    pub confidence: f64,
    pub direction: Direction,
    pub volatility: f64,
    pub indicators: IndicatorSet,
    pub method: PredictionMethod,
}

/// Outcome of a successful training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub epochs: usize,
    pub final_loss: f64,
    pub final_mae: f64,
    pub final_validation_loss: Option<f64>,
}

/// Rounds a confidence value to one decimal place.
pub fn round_confidence(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
