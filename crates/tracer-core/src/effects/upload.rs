//! Upload transport effect

use crate::errors::TracerError;
use crate::upload::UploadBatch;
use async_trait::async_trait;
use std::sync::Arc;

/// Remote endpoint that accepts uploads
#[async_trait]
pub trait UploadTransportEffects: Send + Sync {
    /// Trade a human-entered code for a single-use upload token
    async fn exchange_code(&self, code: &str) -> Result<String, TracerError>;

    /// Submit a batch under its token. `Ok` means the backend confirmed receipt.
    async fn submit(&self, batch: &UploadBatch, device_uid: &str) -> Result<(), TracerError>;
}

#[async_trait]
impl<T: UploadTransportEffects + ?Sized> UploadTransportEffects for Arc<T> {
    async fn exchange_code(&self, code: &str) -> Result<String, TracerError> {
        (**self).exchange_code(code).await
    }

    async fn submit(&self, batch: &UploadBatch, device_uid: &str) -> Result<(), TracerError> {
        (**self).submit(batch, device_uid).await
    }
}
