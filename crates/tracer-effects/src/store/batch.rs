//! Identifier batch persistence

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracer_core::effects::IdentifierBatchStore;
use tracer_core::{IdentifierBatch, TracerError};
use tracing::{debug, warn};

/// Batch store that forgets everything on restart
#[derive(Debug, Clone, Default)]
pub struct MemoryBatchStore {
    batch: Arc<Mutex<Option<IdentifierBatch>>>,
}

impl MemoryBatchStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// What was last saved
    pub fn saved(&self) -> Option<IdentifierBatch> {
        self.batch.lock().clone()
    }
}

#[async_trait]
impl IdentifierBatchStore for MemoryBatchStore {
    async fn load(&self) -> Result<Option<IdentifierBatch>, TracerError> {
        Ok(self.batch.lock().clone())
    }

    async fn save(&self, batch: &IdentifierBatch) -> Result<(), TracerError> {
        *self.batch.lock() = Some(batch.clone());
        Ok(())
    }
}

/// Batch store backed by a single JSON file, replaced atomically on save
#[derive(Debug, Clone)]
pub struct FilesystemBatchStore {
    path: PathBuf,
}

impl FilesystemBatchStore {
    /// Store the batch at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentifierBatchStore for FilesystemBatchStore {
    async fn load(&self) -> Result<Option<IdentifierBatch>, TracerError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&content) {
            Ok(batch) => Ok(Some(batch)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding unreadable identifier batch");
                Ok(None)
            }
        }
    }

    async fn save(&self, batch: &IdentifierBatch) -> Result<(), TracerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_vec(batch)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), remaining = batch.len(), "persisted identifier batch");
        Ok(())
    }
}
