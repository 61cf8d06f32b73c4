//! Upload pipeline
//!
//! One attempt per call: exchange the code for a token, read a ledger
//! snapshot, submit. Each step runs only if the previous one succeeded and no
//! step deletes anything. Whether to clear the ledger afterwards is left to
//! the caller.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracer_core::effects::UploadTransportEffects;
use tracer_core::{UploadBatch, UploadReceipt};
use tracer_effects::DeviceIdentity;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::UploadError;
use crate::ledger::EncounterLedger;

/// Token-gated export of the ledger
pub struct UploadPipeline {
    transport: Arc<dyn UploadTransportEffects>,
    ledger: EncounterLedger,
    identity: DeviceIdentity,
    protocol_version: u32,
    organization_id: String,
    attempt: Mutex<()>,
}

impl std::fmt::Debug for UploadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("protocol_version", &self.protocol_version)
            .field("organization_id", &self.organization_id)
            .finish_non_exhaustive()
    }
}

impl UploadPipeline {
    /// Pipeline exporting `ledger` through `transport` under `identity`
    pub fn new(
        transport: Arc<dyn UploadTransportEffects>,
        ledger: EncounterLedger,
        identity: DeviceIdentity,
        protocol_version: u32,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            ledger,
            identity,
            protocol_version,
            organization_id: organization_id.into(),
            attempt: Mutex::new(()),
        }
    }

    /// Run one upload attempt.
    ///
    /// A second call on the same pipeline waits for the first to finish.
    #[tracing::instrument(skip_all, fields(attempt = %Uuid::new_v4()))]
    pub async fn upload(&self, code: &str) -> Result<UploadReceipt, UploadError> {
        let _attempt = self.attempt.lock().await;

        let upload_token = self.transport.exchange_code(code).await.map_err(|e| {
            warn!(error = %e, "upload token exchange failed");
            UploadError::TokenExchangeFailed {
                message: e.to_string(),
            }
        })?;

        let snapshot = self.ledger.records_for_upload().await.map_err(|e| {
            warn!(error = %e, "could not read ledger, discarding upload token");
            UploadError::LedgerReadFailed {
                message: e.to_string(),
            }
        })?;

        let batch = UploadBatch {
            upload_token,
            records: snapshot.records,
            events: snapshot.events,
            protocol_version: self.protocol_version,
            organization_id: self.organization_id.clone(),
        };
        let receipt = batch.receipt();

        self.transport
            .submit(&batch, &self.identity.get())
            .await
            .map_err(|e| {
                warn!(error = %e, "upload submission failed, ledger kept");
                UploadError::SubmissionFailed {
                    message: e.to_string(),
                }
            })?;

        info!(
            records = receipt.records,
            events = receipt.events,
            "upload confirmed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracer_core::effects::EncounterStoreEffects;
    use tracer_core::{LifecycleEventKind, Timestamp};
    use tracer_effects::{MemoryEncounterStore, SimulatedTimeHandler};
    use tracer_testkit::{peer_fields, FaultyEncounterStore, ScriptedUploadTransport};

    fn pipeline(
        store: Arc<dyn EncounterStoreEffects>,
        transport: &ScriptedUploadTransport,
    ) -> (UploadPipeline, EncounterLedger) {
        let clock = SimulatedTimeHandler::new(Timestamp::from_secs(50_000));
        let ledger = EncounterLedger::new(
            store,
            Arc::new(clock),
            "Pixel 7",
            Duration::from_secs(21 * 24 * 3600),
        );
        let pipeline = UploadPipeline::new(
            Arc::new(transport.clone()),
            ledger.clone(),
            DeviceIdentity::new("device-1"),
            2,
            "hyperjump",
        );
        (pipeline, ledger)
    }

    #[tokio::test]
    async fn successful_upload_submits_snapshot_and_keeps_ledger() {
        let transport = ScriptedUploadTransport::new();
        let (pipeline, ledger) = pipeline(Arc::new(MemoryEncounterStore::new()), &transport);
        let id = ledger.record_observation(-58.0, Some(7.0)).await.unwrap();
        ledger.complete(id, peer_fields("peer")).await.unwrap();
        ledger.record_event(LifecycleEventKind::ScanningStarted).await.unwrap();

        let receipt = pipeline.upload("123456").await.unwrap();
        assert_eq!(receipt, UploadReceipt { records: 1, events: 1 });

        let submissions = transport.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].device_uid, "device-1");
        assert_eq!(submissions[0].batch.upload_token, "token-for-123456");
        assert_eq!(submissions[0].batch.exported_records()[0].v, 2);
        assert_eq!(ledger.count_older_than(Duration::ZERO).await.unwrap(), 0);
        assert_eq!(ledger.count_in_the_last(Duration::from_secs(60)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_exchange_touches_nothing() {
        let transport = ScriptedUploadTransport::new();
        let (pipeline, ledger) = pipeline(Arc::new(MemoryEncounterStore::new()), &transport);
        ledger.record_observation(-58.0, None).await.unwrap();

        transport.fail_next_exchange("bad code");
        let err = pipeline.upload("000000").await.unwrap_err();
        assert!(matches!(err, UploadError::TokenExchangeFailed { .. }));
        assert!(transport.submissions().is_empty());
        assert_eq!(ledger.count_in_the_last(Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_submission_keeps_records() {
        let transport = ScriptedUploadTransport::new();
        let (pipeline, ledger) = pipeline(Arc::new(MemoryEncounterStore::new()), &transport);
        ledger.record_observation(-58.0, None).await.unwrap();

        transport.fail_next_submit("503");
        let err = pipeline.upload("123456").await.unwrap_err();
        assert!(matches!(err, UploadError::SubmissionFailed { .. }));
        assert_eq!(ledger.count_in_the_last(Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unreadable_ledger_stops_before_submission() {
        let transport = ScriptedUploadTransport::new();
        let store = FaultyEncounterStore::new();
        let (pipeline, _) = pipeline(Arc::new(store.clone()), &transport);

        store.fail_reads(true);
        let err = pipeline.upload("123456").await.unwrap_err();
        assert!(matches!(err, UploadError::LedgerReadFailed { .. }));
        assert_eq!(transport.exchanged_codes(), ["123456"]);
        assert!(transport.submissions().is_empty());
    }
}
