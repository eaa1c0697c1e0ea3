//! Orchestration policy parsed from environment variables.

use super::{parse_bool, parse_u64, parse_usize};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub cache_ttl_secs: u64,
    pub auto_train: bool,
    /// Series length at which auto-training is attempted.
    pub min_training_points: usize,
    pub training_epochs: usize,
    /// 0 disables the timeout.
    pub training_timeout_secs: u64,
    pub model_name: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            auto_train: true,
            min_training_points: 50,
            training_epochs: 30,
            training_timeout_secs: 120,
            model_name: "stock-predictor".to_string(),
        }
    }
}

impl PredictionConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            cache_ttl_secs: parse_u64("PREDICTION_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            auto_train: parse_bool("PREDICTION_AUTO_TRAIN", defaults.auto_train)?,
            min_training_points: parse_usize(
                "PREDICTION_MIN_TRAINING_POINTS",
                defaults.min_training_points,
            )?,
            training_epochs: parse_usize("PREDICTION_TRAINING_EPOCHS", defaults.training_epochs)?,
            training_timeout_secs: parse_u64(
                "PREDICTION_TRAINING_TIMEOUT_SECS",
                defaults.training_timeout_secs,
            )?,
            model_name: env::var("PREDICTION_MODEL_NAME").unwrap_or(defaults.model_name),
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn training_timeout(&self) -> Option<Duration> {
        (self.training_timeout_secs > 0).then(|| Duration::from_secs(self.training_timeout_secs))
    }
}
