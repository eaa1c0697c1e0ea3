//! Sequence model hyperparameters parsed from environment variables.

use super::{parse_f64, parse_u64, parse_usize};
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::env;

/// Prices required beyond one full sequence before training is attempted.
pub const MIN_EXTRA_TRAINING_POINTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Feature vectors per input sequence.
    pub sequence_length: usize,
    /// Units per stacked LSTM layer, bottom first.
    pub hidden_units: Vec<usize>,
    pub dense_units: usize,
    /// Inverted dropout rate on each LSTM layer output during training.
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Trailing fraction of examples held out for validation.
    pub validation_split: f64,
    /// Global gradient-norm ceiling; 0 disables clipping.
    pub gradient_clip: f64,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sequence_length: 30,
            hidden_units: vec![64, 32],
            dense_units: 16,
            dropout: 0.2,
            learning_rate: 0.001,
            batch_size: 32,
            validation_split: 0.2,
            gradient_clip: 1.0,
            seed: 42,
        }
    }
}

impl ModelConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            sequence_length: parse_usize("MODEL_SEQUENCE_LENGTH", defaults.sequence_length)?,
            hidden_units: parse_units("MODEL_HIDDEN_UNITS", &defaults.hidden_units)?,
            dense_units: parse_usize("MODEL_DENSE_UNITS", defaults.dense_units)?,
            dropout: parse_f64("MODEL_DROPOUT", defaults.dropout)?,
            learning_rate: parse_f64("MODEL_LEARNING_RATE", defaults.learning_rate)?,
            batch_size: parse_usize("MODEL_BATCH_SIZE", defaults.batch_size)?,
            validation_split: parse_f64("MODEL_VALIDATION_SPLIT", defaults.validation_split)?,
            gradient_clip: parse_f64("MODEL_GRADIENT_CLIP", defaults.gradient_clip)?,
            seed: parse_u64("MODEL_SEED", defaults.seed)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.sequence_length > 0, "MODEL_SEQUENCE_LENGTH must be > 0");
        ensure!(
            !self.hidden_units.is_empty() && self.hidden_units.iter().all(|&units| units > 0),
            "MODEL_HIDDEN_UNITS must list at least one layer, each > 0"
        );
        ensure!(self.dense_units > 0, "MODEL_DENSE_UNITS must be > 0");
        ensure!(self.batch_size > 0, "MODEL_BATCH_SIZE must be > 0");
        ensure!(
            self.learning_rate > 0.0 && self.learning_rate.is_finite(),
            "MODEL_LEARNING_RATE must be a positive number"
        );
        ensure!(
            (0.0..1.0).contains(&self.validation_split),
            "MODEL_VALIDATION_SPLIT must be in [0, 1)"
        );
        ensure!(
            (0.0..1.0).contains(&self.dropout),
            "MODEL_DROPOUT must be in [0, 1)"
        );
        Ok(())
    }

    /// Shortest series a training run accepts.
    pub fn min_training_points(&self) -> usize {
        self.sequence_length + MIN_EXTRA_TRAINING_POINTS
    }

    pub fn gradient_clip(&self) -> Option<f64> {
        (self.gradient_clip > 0.0).then_some(self.gradient_clip)
    }
}

/// Comma-separated layer sizes, e.g. `64,32`.
fn parse_units(key: &str, default: &[usize]) -> Result<Vec<usize>> {
    match env::var(key) {
        Ok(value) => value
            .split(',')
            .map(|s| s.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .context(format!("Failed to parse {}", key)),
        Err(_) => Ok(default.to_vec()),
    }
}
