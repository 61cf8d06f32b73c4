//! Encounter ledger
//!
//! Append-only local history of proximity observations and lifecycle events.
//! Records are ordered by `(timestamp, insertion sequence)`. A record leaves
//! the ledger only through a retention purge, an explicit wipe, or a
//! caller-chosen post-upload clear.

use std::sync::Arc;
use std::time::Duration;
use tracer_core::effects::{EncounterStoreEffects, PhysicalTimeEffects};
use tracer_core::{
    CentralWritePayload, EncounterRecord, LifecycleEvent, LifecycleEventKind, PeerFields,
    ProximityRecord, RecordFilter, RecordId, RecordUpdate, StoredEncounter, Timestamp,
};
use tracing::{debug, info, warn};

use crate::errors::LedgerError;

/// Result of [`EncounterLedger::complete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The record exists; every unset field that `fields` carried is now set
    Applied,
    /// The record is gone, usually purged before the peer exchange finished
    Missing,
}

/// Consistent view of the ledger for one upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSnapshot {
    /// Proximity records, ascending by `(timestamp, insertion)`
    pub records: Vec<ProximityRecord>,
    /// Lifecycle records, same order
    pub events: Vec<LifecycleEvent>,
}

impl UploadSnapshot {
    /// Whether there is nothing to upload
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.events.is_empty()
    }
}

/// Local encounter history, bounded by the retention TTL
#[derive(Clone)]
pub struct EncounterLedger {
    store: Arc<dyn EncounterStoreEffects>,
    clock: Arc<dyn PhysicalTimeEffects>,
    device_model: Arc<str>,
    retention: Duration,
}

impl std::fmt::Debug for EncounterLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncounterLedger")
            .field("device_model", &self.device_model)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl EncounterLedger {
    /// Ledger over `store`, stamping new records with `clock`
    pub fn new(
        store: Arc<dyn EncounterStoreEffects>,
        clock: Arc<dyn PhysicalTimeEffects>,
        device_model: impl Into<String>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            device_model: Arc::from(device_model.into()),
            retention,
        }
    }

    /// Retention TTL used by [`Self::purge_expired`]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append a record. Never retried.
    pub async fn append(&self, record: EncounterRecord) -> Result<RecordId, LedgerError> {
        let timestamp = record.timestamp();
        let id = self.store.insert(record).await.map_err(|e| {
            warn!(error = %e, "failed to append encounter record");
            LedgerError::io("append")(e)
        })?;
        debug!(%id, %timestamp, "appended encounter record");
        Ok(id)
    }

    /// Thin record for a peer discovered while scanning
    pub async fn record_observation(
        &self,
        signal_strength: f64,
        transmit_power: Option<f64>,
    ) -> Result<RecordId, LedgerError> {
        let record = ProximityRecord::observed(
            self.clock.physical_time(),
            self.device_model.as_ref(),
            signal_strength,
            transmit_power,
        );
        self.append(EncounterRecord::Proximity(record)).await
    }

    /// Complete record from a payload a remote central wrote to us
    pub async fn record_central_write(
        &self,
        payload: &CentralWritePayload,
    ) -> Result<RecordId, LedgerError> {
        let record = ProximityRecord::from_central_write(
            self.clock.physical_time(),
            self.device_model.as_ref(),
            payload,
        );
        self.append(EncounterRecord::Proximity(record)).await
    }

    /// Lifecycle marker stamped now
    pub async fn record_event(&self, kind: LifecycleEventKind) -> Result<RecordId, LedgerError> {
        info!(event = kind.label(), "recording lifecycle event");
        self.append(EncounterRecord::event(self.clock.physical_time(), kind))
            .await
    }

    /// Fill the unset peer fields of a record.
    ///
    /// A missing record is not an error: it was purged while the exchange was
    /// in progress. Completing a lifecycle record changes nothing.
    pub async fn complete(
        &self,
        id: RecordId,
        fields: PeerFields,
    ) -> Result<CompletionOutcome, LedgerError> {
        let found = self
            .store
            .update(id, &RecordUpdate::Complete(fields))
            .await
            .map_err(LedgerError::io("complete"))?;
        if found {
            debug!(%id, "completed encounter record");
            Ok(CompletionOutcome::Applied)
        } else {
            let missing = LedgerError::NotFound { id };
            debug!(error = %missing, "completion target missing, ignoring");
            Ok(CompletionOutcome::Missing)
        }
    }

    /// Records with `timestamp < now - age`
    pub async fn count_older_than(&self, age: Duration) -> Result<u64, LedgerError> {
        let cutoff = self.cutoff(age);
        self.store
            .count(&RecordFilter::older_than(cutoff))
            .await
            .map_err(LedgerError::io("count"))
    }

    /// Records with `timestamp >= now - window`
    pub async fn count_in_the_last(&self, window: Duration) -> Result<u64, LedgerError> {
        let cutoff = self.cutoff(window);
        self.store
            .count(&RecordFilter::since(cutoff))
            .await
            .map_err(LedgerError::io("count"))
    }

    /// Delete records with `timestamp < now - age`.
    ///
    /// Only records already present when the purge starts are eligible, so an
    /// append racing with the purge always survives it.
    pub async fn purge_older_than(&self, age: Duration) -> Result<u64, LedgerError> {
        let watermark = self
            .store
            .watermark()
            .await
            .map_err(LedgerError::io("purge"))?;
        let cutoff = self.cutoff(age);
        let filter = RecordFilter::older_than(cutoff).inserted_before(watermark);

        let removed = self.store.delete(&filter).await.map_err(|e| {
            warn!(error = %e, "purge failed, ledger unchanged");
            LedgerError::io("purge")(e)
        })?;
        if removed > 0 {
            info!(removed, %cutoff, "purged encounter records");
        }
        Ok(removed)
    }

    /// Purge everything past the retention TTL
    pub async fn purge_expired(&self) -> Result<u64, LedgerError> {
        self.purge_older_than(self.retention).await
    }

    /// Delete every record
    pub async fn purge_all(&self) -> Result<u64, LedgerError> {
        let removed = self
            .store
            .delete_all()
            .await
            .map_err(LedgerError::io("purge_all"))?;
        info!(removed, "wiped encounter ledger");
        Ok(removed)
    }

    /// Snapshot of every record, split by kind
    pub async fn records_for_upload(&self) -> Result<UploadSnapshot, LedgerError> {
        let stored = self
            .store
            .snapshot()
            .await
            .map_err(LedgerError::io("snapshot"))?;

        let mut snapshot = UploadSnapshot::default();
        for StoredEncounter { record, .. } in stored {
            match record {
                EncounterRecord::Proximity(r) => snapshot.records.push(r),
                EncounterRecord::Lifecycle(e) => snapshot.events.push(e),
            }
        }
        Ok(snapshot)
    }

    /// Newest records first, for diagnostics
    pub async fn recent_encounters(&self, limit: usize) -> Result<Vec<StoredEncounter>, LedgerError> {
        self.store
            .recent(limit)
            .await
            .map_err(LedgerError::io("recent"))
    }

    fn cutoff(&self, age: Duration) -> Timestamp {
        self.clock.physical_time().saturating_sub(age)
    }
}
