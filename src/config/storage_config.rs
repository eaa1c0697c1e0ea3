//! Model store and price source selection parsed from environment variables.

use super::{parse_u64, parse_usize};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Backend for persisted model blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStoreKind {
    File,
    Sqlite,
    Memory,
}

impl FromStr for ModelStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(ModelStoreKind::File),
            "sqlite" => Ok(ModelStoreKind::Sqlite),
            "memory" => Ok(ModelStoreKind::Memory),
            _ => anyhow::bail!(
                "Invalid MODEL_STORE: {}. Must be 'file', 'sqlite', or 'memory'",
                s
            ),
        }
    }
}

/// Where closing prices come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Csv,
    Mock,
}

impl FromStr for PriceSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(PriceSource::Csv),
            "mock" => Ok(PriceSource::Mock),
            _ => anyhow::bail!("Invalid PRICE_SOURCE: {}. Must be 'csv' or 'mock'", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub model_store: ModelStoreKind,
    pub model_store_path: PathBuf,
    pub model_store_db_url: String,
    pub price_source: PriceSource,
    pub price_data_dir: PathBuf,
    pub price_lookback: usize,
    pub mock_seed: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_store: ModelStoreKind::File,
            model_store_path: PathBuf::from("data/models"),
            model_store_db_url: "sqlite://data/models.db".to_string(),
            price_source: PriceSource::Mock,
            price_data_dir: PathBuf::from("data/prices"),
            price_lookback: 250,
            mock_seed: 7,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            model_store: env::var("MODEL_STORE")
                .unwrap_or_else(|_| "file".to_string())
                .parse()?,
            model_store_path: env::var("MODEL_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_store_path),
            model_store_db_url: env::var("MODEL_STORE_DB_URL")
                .unwrap_or(defaults.model_store_db_url),
            price_source: env::var("PRICE_SOURCE")
                .unwrap_or_else(|_| "mock".to_string())
                .parse()?,
            price_data_dir: env::var("PRICE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.price_data_dir),
            price_lookback: parse_usize("PRICE_LOOKBACK", defaults.price_lookback)?,
            mock_seed: parse_u64("PRICE_MOCK_SEED", defaults.mock_seed)?,
        })
    }
}
