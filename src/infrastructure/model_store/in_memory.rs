use crate::domain::ports::ModelStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory model store. Contents are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryModelStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.blobs.read().await.contains_key(name)
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn save(&self, name: &str, blob: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(name.to_string(), blob.to_vec());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_roundtrip() {
        let store = InMemoryModelStore::new();
        assert!(store.load("m").await.unwrap().is_none());

        store.save("m", &[1, 2, 3]).await.unwrap();

        assert!(store.contains("m").await);
        assert_eq!(store.load("m").await.unwrap(), Some(vec![1, 2, 3]));
    }
}
