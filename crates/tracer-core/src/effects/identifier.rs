//! Identifier source and batch persistence effects

use crate::errors::TracerError;
use crate::identifier::IdentifierBatch;
use async_trait::async_trait;
use std::sync::Arc;

/// Remote issuer of identifier batches
#[async_trait]
pub trait IdentifierSourceEffects: Send + Sync {
    /// Fetch a fresh batch.
    ///
    /// The batch is already validated: non-empty and sorted by window start.
    async fn fetch_batch(&self) -> Result<IdentifierBatch, TracerError>;
}

/// Durable home of the current batch across restarts
#[async_trait]
pub trait IdentifierBatchStore: Send + Sync {
    /// The last saved batch, if any
    async fn load(&self) -> Result<Option<IdentifierBatch>, TracerError>;

    /// Replace the saved batch
    async fn save(&self, batch: &IdentifierBatch) -> Result<(), TracerError>;
}

#[async_trait]
impl<T: IdentifierSourceEffects + ?Sized> IdentifierSourceEffects for Arc<T> {
    async fn fetch_batch(&self) -> Result<IdentifierBatch, TracerError> {
        (**self).fetch_batch().await
    }
}

#[async_trait]
impl<T: IdentifierBatchStore + ?Sized> IdentifierBatchStore for Arc<T> {
    async fn load(&self) -> Result<Option<IdentifierBatch>, TracerError> {
        (**self).load().await
    }

    async fn save(&self, batch: &IdentifierBatch) -> Result<(), TracerError> {
        (**self).save(batch).await
    }
}
