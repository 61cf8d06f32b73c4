//! Durable encounter store effect
//!
//! Stores own ordering: queries return records ascending by
//! `(timestamp, id)`, and ids are handed out in strictly increasing order.
//! Every mutating call is all-or-nothing.

use crate::encounter::{EncounterRecord, RecordFilter, RecordId, RecordUpdate, StoredEncounter};
use crate::errors::TracerError;
use async_trait::async_trait;
use std::sync::Arc;

/// Append/query/delete interface over encounter records
#[async_trait]
pub trait EncounterStoreEffects: Send + Sync {
    /// Insert a new record and return its reference
    async fn insert(&self, record: EncounterRecord) -> Result<RecordId, TracerError>;

    /// Apply an in-place update. `Ok(false)` means the record does not exist.
    async fn update(&self, id: RecordId, update: &RecordUpdate) -> Result<bool, TracerError>;

    /// Count records matching `filter`
    async fn count(&self, filter: &RecordFilter) -> Result<u64, TracerError>;

    /// Delete records matching `filter`, returning how many went
    async fn delete(&self, filter: &RecordFilter) -> Result<u64, TracerError>;

    /// Delete everything, returning how many went
    async fn delete_all(&self) -> Result<u64, TracerError>;

    /// Every record, ascending by `(timestamp, id)`, read atomically
    async fn snapshot(&self) -> Result<Vec<StoredEncounter>, TracerError>;

    /// Up to `limit` records, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<StoredEncounter>, TracerError>;

    /// The id the next insert will receive
    async fn watermark(&self) -> Result<RecordId, TracerError>;
}

#[async_trait]
impl<T: EncounterStoreEffects + ?Sized> EncounterStoreEffects for Arc<T> {
    async fn insert(&self, record: EncounterRecord) -> Result<RecordId, TracerError> {
        (**self).insert(record).await
    }

    async fn update(&self, id: RecordId, update: &RecordUpdate) -> Result<bool, TracerError> {
        (**self).update(id, update).await
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        (**self).count(filter).await
    }

    async fn delete(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        (**self).delete(filter).await
    }

    async fn delete_all(&self) -> Result<u64, TracerError> {
        (**self).delete_all().await
    }

    async fn snapshot(&self) -> Result<Vec<StoredEncounter>, TracerError> {
        (**self).snapshot().await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEncounter>, TracerError> {
        (**self).recent(limit).await
    }

    async fn watermark(&self) -> Result<RecordId, TracerError> {
        (**self).watermark().await
    }
}
