//! Agent composition root
//!
//! [`AgentBuilder`] wires effect handlers into the three runtime components
//! and [`TracerAgent`] is the facade the broadcast layer and the host app
//! talk to. Anything not injected is derived from [`TracerConfig`]: the HTTP
//! client from `base_url`, filesystem stores from `data_dir`, the real clock
//! otherwise.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracer_core::effects::{
    EncounterStoreEffects, IdentifierBatchStore, IdentifierSourceEffects, PhysicalTimeEffects,
    UploadTransportEffects,
};
use tracer_core::{
    AdvertisementPayload, CentralWritePayload, LifecycleEventKind, PeerFields, RecordId,
    ScanSchedule, StoredEncounter, TracerConfig, UploadReceipt,
};
use tracer_effects::{
    DeviceIdentity, FilesystemBatchStore, FilesystemEncounterStore, HttpTraceClient,
    MemoryBatchStore, MemoryEncounterStore, RealTimeHandler,
};
use tracing::{info, warn};

use crate::errors::{AgentError, AgentResult, LedgerError};
use crate::ledger::{CompletionOutcome, EncounterLedger};
use crate::rotation::{CacheStatus, IdentifierRotationCache};
use crate::upload::UploadPipeline;

const ENCOUNTER_JOURNAL: &str = "encounters.jsonl";
const IDENTIFIER_BATCH: &str = "identifiers.json";

/// What to do with the ledger after a confirmed upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadPolicy {
    /// Keep every record; retention purges them later
    #[default]
    RetainLedger,
    /// Wipe the ledger once the backend has confirmed receipt
    ClearLedger,
}

/// What happened to the ledger after a confirmed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearStatus {
    /// Nothing was deleted
    Retained,
    /// The ledger was wiped
    Cleared {
        /// Records deleted
        removed: u64,
    },
    /// The upload succeeded but the wipe did not
    ClearFailed(LedgerError),
}

/// Outcome of [`TracerAgent::upload_with_policy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    /// What the backend accepted
    pub receipt: UploadReceipt,
    /// Post-upload ledger handling
    pub clear: ClearStatus,
}

/// Builder for [`TracerAgent`]
pub struct AgentBuilder {
    config: TracerConfig,
    identity: Option<DeviceIdentity>,
    clock: Option<Arc<dyn PhysicalTimeEffects>>,
    identifier_source: Option<Arc<dyn IdentifierSourceEffects>>,
    upload_transport: Option<Arc<dyn UploadTransportEffects>>,
    encounter_store: Option<Arc<dyn EncounterStoreEffects>>,
    batch_store: Option<Arc<dyn IdentifierBatchStore>>,
}

impl AgentBuilder {
    /// Start from a configuration
    pub fn new(config: TracerConfig) -> Self {
        Self {
            config,
            identity: None,
            clock: None,
            identifier_source: None,
            upload_transport: None,
            encounter_store: None,
            batch_store: None,
        }
    }

    /// Share a device identity handle instead of creating one from `device_uid`
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Use this clock
    pub fn with_clock(mut self, clock: Arc<dyn PhysicalTimeEffects>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use this identifier source
    pub fn with_identifier_source(mut self, source: Arc<dyn IdentifierSourceEffects>) -> Self {
        self.identifier_source = Some(source);
        self
    }

    /// Use this upload transport
    pub fn with_upload_transport(mut self, transport: Arc<dyn UploadTransportEffects>) -> Self {
        self.upload_transport = Some(transport);
        self
    }

    /// Use this encounter store
    pub fn with_encounter_store(mut self, store: Arc<dyn EncounterStoreEffects>) -> Self {
        self.encounter_store = Some(store);
        self
    }

    /// Use this identifier batch store
    pub fn with_batch_store(mut self, store: Arc<dyn IdentifierBatchStore>) -> Self {
        self.batch_store = Some(store);
        self
    }

    /// Validate the configuration, fill in missing effects and assemble the agent
    pub async fn build(self) -> AgentResult<TracerAgent> {
        let config = self.config;
        config.validate()?;

        let identity = self
            .identity
            .unwrap_or_else(|| DeviceIdentity::new(config.device_uid.clone()));

        let http = (!config.base_url.is_empty())
            .then(|| Arc::new(HttpTraceClient::new(config.base_url.clone(), identity.clone())));

        let identifier_source: Arc<dyn IdentifierSourceEffects> = match self.identifier_source {
            Some(source) => source,
            None => http
                .clone()
                .map(|client| client as Arc<dyn IdentifierSourceEffects>)
                .ok_or(AgentError::MissingEffect {
                    effect: "identifier source",
                })?,
        };
        let upload_transport: Arc<dyn UploadTransportEffects> = match self.upload_transport {
            Some(transport) => transport,
            None => http
                .map(|client| client as Arc<dyn UploadTransportEffects>)
                .ok_or(AgentError::MissingEffect {
                    effect: "upload transport",
                })?,
        };

        let encounter_store: Arc<dyn EncounterStoreEffects> =
            match (self.encounter_store, &config.data_dir) {
                (Some(store), _) => store,
                (None, Some(dir)) => Arc::new(
                    FilesystemEncounterStore::open(dir.join(ENCOUNTER_JOURNAL))
                        .await
                        .map_err(AgentError::Storage)?,
                ),
                (None, None) => Arc::new(MemoryEncounterStore::new()),
            };
        let batch_store: Arc<dyn IdentifierBatchStore> = match (self.batch_store, &config.data_dir)
        {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FilesystemBatchStore::new(dir.join(IDENTIFIER_BATCH))),
            (None, None) => Arc::new(MemoryBatchStore::new()),
        };

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(RealTimeHandler::new()));

        let identifiers =
            IdentifierRotationCache::new(identifier_source, batch_store, clock.clone());
        let ledger = EncounterLedger::new(
            encounter_store,
            clock,
            config.device_model.clone(),
            config.retention(),
        );
        let uploads = UploadPipeline::new(
            upload_transport,
            ledger.clone(),
            identity.clone(),
            config.protocol_version,
            config.organization_id.clone(),
        );

        info!(
            device_model = %config.device_model,
            organization = %config.organization_id,
            retention_days = config.retention_days,
            persistent = config.data_dir.is_some(),
            "tracer agent assembled"
        );

        Ok(TracerAgent {
            scan: Mutex::new(config.scan),
            config,
            identity,
            identifiers,
            ledger,
            uploads,
            tracing: AtomicBool::new(false),
        })
    }
}

/// Proximity tracing client core
#[derive(Debug)]
pub struct TracerAgent {
    config: TracerConfig,
    identity: DeviceIdentity,
    identifiers: IdentifierRotationCache,
    ledger: EncounterLedger,
    uploads: UploadPipeline,
    scan: Mutex<ScanSchedule>,
    tracing: AtomicBool,
}

impl TracerAgent {
    /// Shorthand for [`AgentBuilder::new`]
    pub fn builder(config: TracerConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// Begin tracing.
    ///
    /// Restores the persisted batch, tries one refresh, enforces retention and
    /// records `ScanningStarted`. Only the ledger write can fail the call;
    /// identifier and purge problems are logged and retried on next use.
    pub async fn start(&self) -> AgentResult<()> {
        if let Err(e) = self.identifiers.restore().await {
            warn!(error = %e, "could not restore identifier batch");
        }
        if let Err(e) = self.identifiers.ensure_fresh().await {
            warn!(error = %e, "identifier refresh at start failed");
        }
        if let Err(e) = self.ledger.purge_expired().await {
            warn!(error = %e, "retention purge at start failed");
        }
        self.ledger
            .record_event(LifecycleEventKind::ScanningStarted)
            .await?;
        self.tracing.store(true, Ordering::SeqCst);
        info!("tracing started");
        Ok(())
    }

    /// Stop tracing and record `ScanningStopped`. A no-op when not tracing.
    pub async fn stop(&self) -> AgentResult<()> {
        if !self.tracing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.ledger
            .record_event(LifecycleEventKind::ScanningStopped)
            .await?;
        info!("tracing stopped");
        Ok(())
    }

    /// Whether [`Self::start`] has run without a matching [`Self::stop`]
    pub fn is_tracing(&self) -> bool {
        self.tracing.load(Ordering::SeqCst)
    }

    /// Replace the device uid used for fetches and uploads
    pub fn set_identity(&self, uid: impl Into<String>) {
        self.identity.set(uid);
    }

    /// Current device uid
    pub fn identity(&self) -> String {
        self.identity.get()
    }

    /// The rotation cache
    pub fn identifiers(&self) -> &IdentifierRotationCache {
        &self.identifiers
    }

    /// The encounter ledger
    pub fn ledger(&self) -> &EncounterLedger {
        &self.ledger
    }

    /// Rotation cache diagnostics
    pub fn identifier_status(&self) -> CacheStatus {
        self.identifiers.status()
    }

    /// What to put on air now. `None` pauses broadcasting.
    pub async fn advertisement_payload(&self) -> AgentResult<Option<AdvertisementPayload>> {
        let Some(id) = self.identifiers.next_identifier().await? else {
            return Ok(None);
        };
        Ok(Some(AdvertisementPayload {
            mp: self.config.device_model.clone(),
            id: id.token,
            o: self.config.organization_id.clone(),
            v: self.config.protocol_version,
        }))
    }

    /// A peripheral was discovered; returns the thin record to complete later
    pub async fn record_discovery(
        &self,
        signal_strength: f64,
        transmit_power: Option<f64>,
    ) -> AgentResult<RecordId> {
        Ok(self
            .ledger
            .record_observation(signal_strength, transmit_power)
            .await?)
    }

    /// The discovered peripheral's advertisement was read
    pub async fn record_peer_advertisement(
        &self,
        id: RecordId,
        payload: &AdvertisementPayload,
    ) -> AgentResult<CompletionOutcome> {
        Ok(self
            .ledger
            .complete(id, PeerFields::from_advertisement(payload))
            .await?)
    }

    /// A remote central wrote its payload to us
    pub async fn record_central_write(&self, payload: &CentralWritePayload) -> AgentResult<RecordId> {
        Ok(self.ledger.record_central_write(payload).await?)
    }

    /// Upload and keep the ledger
    pub async fn upload(&self, code: &str) -> AgentResult<UploadReceipt> {
        Ok(self.uploads.upload(code).await?)
    }

    /// Upload, then handle the ledger according to `policy`.
    ///
    /// A failed clear does not fail the upload; it is reported in the summary.
    pub async fn upload_with_policy(
        &self,
        code: &str,
        policy: UploadPolicy,
    ) -> AgentResult<UploadSummary> {
        let receipt = self.uploads.upload(code).await?;
        let clear = match policy {
            UploadPolicy::RetainLedger => ClearStatus::Retained,
            UploadPolicy::ClearLedger => match self.ledger.purge_all().await {
                Ok(removed) => ClearStatus::Cleared { removed },
                Err(e) => {
                    warn!(error = %e, "upload confirmed but clearing the ledger failed");
                    ClearStatus::ClearFailed(e)
                }
            },
        };
        Ok(UploadSummary { receipt, clear })
    }

    /// Delete records older than `age`
    pub async fn remove_data(&self, age: Duration) -> AgentResult<u64> {
        Ok(self.ledger.purge_older_than(age).await?)
    }

    /// Delete records past the retention TTL
    pub async fn remove_expired_data(&self) -> AgentResult<u64> {
        Ok(self.ledger.purge_expired().await?)
    }

    /// Delete every record
    pub async fn remove_all_data(&self) -> AgentResult<u64> {
        Ok(self.ledger.purge_all().await?)
    }

    /// Records older than `age`
    pub async fn count_encounters_older_than(&self, age: Duration) -> AgentResult<u64> {
        Ok(self.ledger.count_older_than(age).await?)
    }

    /// Records from the last `window`
    pub async fn count_encounters_in_the_last(&self, window: Duration) -> AgentResult<u64> {
        Ok(self.ledger.count_in_the_last(window).await?)
    }

    /// Newest records first
    pub async fn recent_encounters(&self, limit: usize) -> AgentResult<Vec<StoredEncounter>> {
        Ok(self.ledger.recent_encounters(limit).await?)
    }

    /// Scan cadence for the broadcast layer
    pub fn scan_schedule(&self) -> ScanSchedule {
        *self.scan.lock()
    }

    /// Seconds between scans; zero is ignored
    pub fn set_scanning_interval(&self, secs: u64) -> bool {
        self.scan.lock().set_interval(secs)
    }

    /// Seconds per scan; zero is ignored
    pub fn set_scanning_duration(&self, secs: u64) -> bool {
        self.scan.lock().set_duration(secs)
    }

    /// Configuration the agent was built with
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }
}
