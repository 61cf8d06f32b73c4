//! Scripted and fault-injecting effect handlers
//!
//! Every mock is cheap to clone and clones share state, so a test keeps one
//! handle for scripting and assertions while the runtime owns another.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracer_core::effects::{
    EncounterStoreEffects, IdentifierBatchStore, IdentifierSourceEffects, UploadTransportEffects,
};
use tracer_core::{
    EncounterRecord, IdentifierBatch, RecordFilter, RecordId, RecordUpdate, StoredEncounter,
    TracerError, UploadBatch,
};
use tracer_effects::{MemoryBatchStore, MemoryEncounterStore};

/// Releases fetches held by [`ScriptedIdentifierSource::hold_fetches`]
#[derive(Debug, Clone)]
pub struct FetchGate {
    permits: Arc<Semaphore>,
}

impl FetchGate {
    /// Let one held fetch proceed
    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

#[derive(Debug, Default)]
struct SourceState {
    script: Mutex<VecDeque<Result<IdentifierBatch, TracerError>>>,
    fetches: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

/// Identifier source that replays a script of batches and failures.
///
/// An exhausted script answers with a network error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedIdentifierSource {
    state: Arc<SourceState>,
}

impl ScriptedIdentifierSource {
    /// Empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful fetch
    pub fn push_batch(&self, batch: IdentifierBatch) {
        self.state.script.lock().push_back(Ok(batch));
    }

    /// Queue a failed fetch
    pub fn push_failure(&self, message: &str) {
        self.state
            .script
            .lock()
            .push_back(Err(TracerError::network(message)));
    }

    /// Make every later fetch wait for a [`FetchGate::release`]
    pub fn hold_fetches(&self) -> FetchGate {
        let permits = Arc::new(Semaphore::new(0));
        *self.state.gate.lock() = Some(permits.clone());
        FetchGate { permits }
    }

    /// Fetches started so far
    pub fn fetch_count(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentifierSourceEffects for ScriptedIdentifierSource {
    async fn fetch_batch(&self) -> Result<IdentifierBatch, TracerError> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| TracerError::internal("fetch gate closed"))?
                .forget();
        }
        self.state
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TracerError::network("no scripted batch")))
    }
}

/// One confirmed submission
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// What was submitted
    pub batch: UploadBatch,
    /// Device uid it was submitted under
    pub device_uid: String,
}

#[derive(Debug, Default)]
struct TransportState {
    exchange_failures: Mutex<VecDeque<String>>,
    submit_failures: Mutex<VecDeque<String>>,
    codes: Mutex<Vec<String>>,
    submissions: Mutex<Vec<Submission>>,
}

/// Upload transport that accepts everything unless told otherwise.
///
/// Code `c` exchanges to token `token-for-c`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedUploadTransport {
    state: Arc<TransportState>,
}

impl ScriptedUploadTransport {
    /// Transport that succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next token exchange
    pub fn fail_next_exchange(&self, message: &str) {
        self.state
            .exchange_failures
            .lock()
            .push_back(message.to_string());
    }

    /// Fail the next submission
    pub fn fail_next_submit(&self, message: &str) {
        self.state
            .submit_failures
            .lock()
            .push_back(message.to_string());
    }

    /// Codes presented for exchange, in order
    pub fn exchanged_codes(&self) -> Vec<String> {
        self.state.codes.lock().clone()
    }

    /// Confirmed submissions, in order
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.submissions.lock().clone()
    }
}

#[async_trait]
impl UploadTransportEffects for ScriptedUploadTransport {
    async fn exchange_code(&self, code: &str) -> Result<String, TracerError> {
        self.state.codes.lock().push(code.to_string());
        if let Some(message) = self.state.exchange_failures.lock().pop_front() {
            return Err(TracerError::network(message));
        }
        Ok(format!("token-for-{code}"))
    }

    async fn submit(&self, batch: &UploadBatch, device_uid: &str) -> Result<(), TracerError> {
        if let Some(message) = self.state.submit_failures.lock().pop_front() {
            return Err(TracerError::network(message));
        }
        self.state.submissions.lock().push(Submission {
            batch: batch.clone(),
            device_uid: device_uid.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
    insert_before_delete: Mutex<Option<EncounterRecord>>,
}

/// Memory store wrapper that can fail on demand.
///
/// It can also slip an insert in between a purge's watermark capture and its
/// delete, the way a concurrent append would land.
#[derive(Debug, Clone, Default)]
pub struct FaultyEncounterStore {
    inner: MemoryEncounterStore,
    faults: Arc<Faults>,
}

impl FaultyEncounterStore {
    /// Wrap an empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for direct inspection
    pub fn inner(&self) -> &MemoryEncounterStore {
        &self.inner
    }

    /// Toggle insert failures
    pub fn fail_inserts(&self, fail: bool) {
        self.faults.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Toggle snapshot and count failures
    pub fn fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Toggle delete failures
    pub fn fail_deletes(&self, fail: bool) {
        self.faults.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Insert `record` right before the next filtered delete runs
    pub fn insert_before_next_delete(&self, record: EncounterRecord) {
        *self.faults.insert_before_delete.lock() = Some(record);
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<(), TracerError> {
        if flag.load(Ordering::SeqCst) {
            Err(TracerError::storage(format!("injected {operation} failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EncounterStoreEffects for FaultyEncounterStore {
    async fn insert(&self, record: EncounterRecord) -> Result<RecordId, TracerError> {
        Self::check(&self.faults.fail_inserts, "insert")?;
        self.inner.insert(record).await
    }

    async fn update(&self, id: RecordId, update: &RecordUpdate) -> Result<bool, TracerError> {
        Self::check(&self.faults.fail_inserts, "update")?;
        self.inner.update(id, update).await
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        Self::check(&self.faults.fail_reads, "count")?;
        self.inner.count(filter).await
    }

    async fn delete(&self, filter: &RecordFilter) -> Result<u64, TracerError> {
        Self::check(&self.faults.fail_deletes, "delete")?;
        let injected = self.faults.insert_before_delete.lock().take();
        if let Some(record) = injected {
            self.inner.insert(record).await?;
        }
        self.inner.delete(filter).await
    }

    async fn delete_all(&self) -> Result<u64, TracerError> {
        Self::check(&self.faults.fail_deletes, "delete_all")?;
        self.inner.delete_all().await
    }

    async fn snapshot(&self) -> Result<Vec<StoredEncounter>, TracerError> {
        Self::check(&self.faults.fail_reads, "snapshot")?;
        self.inner.snapshot().await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredEncounter>, TracerError> {
        Self::check(&self.faults.fail_reads, "recent")?;
        self.inner.recent(limit).await
    }

    async fn watermark(&self) -> Result<RecordId, TracerError> {
        self.inner.watermark().await
    }
}

/// Memory batch store whose saves can be made to fail
#[derive(Debug, Clone, Default)]
pub struct FaultyBatchStore {
    inner: MemoryBatchStore,
    fail_saves: Arc<AtomicBool>,
}

impl FaultyBatchStore {
    /// Wrap an empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle save failures
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// What was last saved successfully
    pub fn saved(&self) -> Option<IdentifierBatch> {
        self.inner.saved()
    }
}

#[async_trait]
impl IdentifierBatchStore for FaultyBatchStore {
    async fn load(&self) -> Result<Option<IdentifierBatch>, TracerError> {
        self.inner.load().await
    }

    async fn save(&self, batch: &IdentifierBatch) -> Result<(), TracerError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(TracerError::storage("injected save failure"));
        }
        self.inner.save(batch).await
    }
}
