//! In-memory encounter store for testing and diagnostics-only deployments

use super::table::EncounterTable;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracer_core::effects::EncounterStoreEffects;
use tracer_core::{
    EncounterRecord, RecordFilter, RecordId, RecordUpdate, StoredEncounter, TracerError,
};

/// In-memory encounter store.
///
/// A single read-write lock guards the table, so snapshots never observe a
/// half-applied insert.
#[derive(Debug, Clone, Default)]
pub struct MemoryEncounterStore {
    table: Arc<RwLock<EncounterTable>>,
}

impl MemoryEncounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held
    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EncounterStoreEffects for MemoryEncounterStore {
    async fn insert(&self, record: EncounterRecord) -> Result<RecordId, TracerError> {
        Ok(self.table.write().await.insert(record))
    }

    async fn update(&self, id: RecordId, update: &RecordUpdate) -> Result<bool, TracerError> {
        Ok(self.table.write().await.update(id, update).is_some())
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        Ok(self.table.read().await.count(filter))
    }

    async fn delete(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        let mut table = self.table.write().await;
        let ids = table.matching_ids(filter);
        Ok(table.remove_ids(&ids))
    }

    async fn delete_all(&self) -> Result<u64, TracerError> {
        Ok(self.table.write().await.clear())
    }

    async fn snapshot(&self) -> Result<Vec<StoredEncounter>, TracerError> {
        Ok(self.table.read().await.snapshot())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEncounter>, TracerError> {
        Ok(self.table.read().await.recent(limit))
    }

    async fn watermark(&self) -> Result<RecordId, TracerError> {
        Ok(self.table.read().await.next_id())
    }
}
