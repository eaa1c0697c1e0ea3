use crate::domain::ports::ModelStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Stores each model as `{dir}/{name}.json`.
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save(&self, name: &str, blob: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create model directory")?;

        let path = self.path_for(name);
        // Atomic write: write to temp file then rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, blob)
            .await
            .context("Failed to write temp model file")?;
        fs::rename(&temp_path, &path)
            .await
            .context("Failed to rename model file")?;

        info!("Saved model to {:?}", path);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name);
        match fs::read(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read model file {:?}", path)),
        }
    }
}
