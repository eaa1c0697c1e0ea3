use crate::config::{ModelStoreKind, PriceSource, StorageConfig};
use crate::domain::ports::{ModelStore, PriceHistoryProvider};
use crate::infrastructure::model_store::{FileModelStore, InMemoryModelStore, SqliteModelStore};
use crate::infrastructure::price_history::{CsvPriceHistory, MockPriceHistory};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub struct ServiceFactory;

impl ServiceFactory {
    pub async fn create_model_store(config: &StorageConfig) -> Result<Arc<dyn ModelStore>> {
        let store: Arc<dyn ModelStore> = match config.model_store {
            ModelStoreKind::File => {
                info!("Model store: files under {:?}", config.model_store_path);
                Arc::new(FileModelStore::new(config.model_store_path.clone()))
            }
            ModelStoreKind::Sqlite => {
                Arc::new(SqliteModelStore::connect(&config.model_store_db_url).await?)
            }
            ModelStoreKind::Memory => {
                info!("Model store: in-memory (models are not persisted)");
                Arc::new(InMemoryModelStore::new())
            }
        };
        Ok(store)
    }

    pub fn create_price_history(config: &StorageConfig) -> Arc<dyn PriceHistoryProvider> {
        match config.price_source {
            PriceSource::Csv => {
                info!("Price source: CSV files under {:?}", config.price_data_dir);
                Arc::new(CsvPriceHistory::new(config.price_data_dir.clone()))
            }
            PriceSource::Mock => {
                info!("Price source: mock random walk (seed {})", config.mock_seed);
                Arc::new(MockPriceHistory::new(config.mock_seed))
            }
        }
    }
}
