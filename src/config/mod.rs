//! Configuration module for Quotecast.
//!
//! Configuration loads from environment variables, organized by concern:
//! Prediction policy, Model hyperparameters, and Storage. A TOML file with
//! `[prediction]`, `[model]` and `[storage]` tables may be used instead.

mod model_config;
mod prediction_config;
mod storage_config;

pub use model_config::{MIN_EXTRA_TRAINING_POINTS, ModelConfig};
pub use prediction_config::PredictionConfig;
pub use storage_config::{ModelStoreKind, PriceSource, StorageConfig};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Main engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub prediction: PredictionConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            prediction: PredictionConfig::from_env()?,
            model: ModelConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks each section and that auto-training is never attempted on a
    /// series too short for the configured sequence length.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        let required = self.model.min_training_points();
        ensure!(
            self.prediction.min_training_points >= required,
            "PREDICTION_MIN_TRAINING_POINTS ({}) must be at least MODEL_SEQUENCE_LENGTH + {} ({})",
            self.prediction.min_training_points,
            MIN_EXTRA_TRAINING_POINTS,
            required
        );
        Ok(())
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&contents)
    }
}

pub(crate) fn parse_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<usize>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<f64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_bool(key: &str, default: bool) -> Result<bool> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<bool>()
        .context(format!("Failed to parse {}", key))
}
