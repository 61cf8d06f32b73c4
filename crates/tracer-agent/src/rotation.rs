//! Identifier rotation cache
//!
//! Owns the current [`IdentifierBatch`] and answers "which identifier do I
//! broadcast right now". Selection is synchronous: it evicts expired heads in
//! order and returns whatever is left at the front. Refreshing is async and
//! single-flight: every caller that arrives while a fetch is running awaits the
//! same shared future, so one staleness episode costs exactly one fetch.
//!
//! The clock is never trusted to move forward. The cache remembers the latest
//! instant it has observed and evicts against that, so a backward step cannot
//! bring an evicted identifier back.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracer_core::effects::{IdentifierBatchStore, IdentifierSourceEffects, PhysicalTimeEffects};
use tracer_core::{IdentifierBatch, TempId, Timestamp};
use tracing::{debug, info, warn};

use crate::errors::IdentifierError;

type RefreshFuture = Shared<BoxFuture<'static, Result<RefreshOutcome, IdentifierError>>>;

/// Lifecycle state of the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No batch has been loaded
    Empty,
    /// A batch is loaded and its refresh instant has not passed
    Fresh,
    /// The refresh instant has passed or no usable identifier remains
    Stale,
    /// A fetch is in flight
    Refreshing,
}

/// Point-in-time view of the cache for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    /// Current state
    pub state: CacheState,
    /// The most recent fetch delivered a batch that had already expired
    pub exhausted_on_arrival: bool,
    /// Unexpired identifiers left in the installed batch
    pub remaining: usize,
    /// Refresh instant of the installed batch
    pub refresh_at: Option<Timestamp>,
}

/// What a successful [`IdentifierRotationCache::ensure_fresh`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The installed batch was still fresh; nothing was fetched
    AlreadyFresh,
    /// A new batch was fetched, persisted and installed
    Refreshed {
        /// Identifiers installed
        identifiers: usize,
        /// Identifiers dropped because they expired before installation
        evicted_on_arrival: usize,
    },
}

#[derive(Default)]
struct CacheInner {
    batch: Option<IdentifierBatch>,
    in_flight: Option<RefreshFuture>,
    exhausted_on_arrival: bool,
    high_water: Timestamp,
}

impl CacheInner {
    /// Read the clock, clamped to the latest instant seen so far
    fn observe(&mut self, clock: &dyn PhysicalTimeEffects) -> Timestamp {
        let now = clock.physical_time();
        if now < self.high_water {
            debug!(
                now = %now,
                high_water = %self.high_water,
                "clock moved backwards, evicting against high-water mark"
            );
        } else {
            self.high_water = now;
        }
        self.high_water
    }

    fn evict(&mut self, now: Timestamp) {
        if let Some(batch) = self.batch.as_mut() {
            let evicted = batch.evict_expired(now);
            if evicted > 0 {
                debug!(evicted, remaining = batch.len(), "evicted expired identifiers");
            }
        }
    }

    fn state_at(&self, now: Timestamp) -> CacheState {
        if self.in_flight.is_some() {
            return CacheState::Refreshing;
        }
        match &self.batch {
            None => CacheState::Empty,
            Some(batch) if batch.is_exhausted() || batch.is_refresh_due(now) => CacheState::Stale,
            Some(_) => CacheState::Fresh,
        }
    }
}

/// Holder of the current identifier batch
pub struct IdentifierRotationCache {
    source: Arc<dyn IdentifierSourceEffects>,
    persistence: Arc<dyn IdentifierBatchStore>,
    clock: Arc<dyn PhysicalTimeEffects>,
    inner: Arc<Mutex<CacheInner>>,
}

impl std::fmt::Debug for IdentifierRotationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierRotationCache")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl IdentifierRotationCache {
    /// Create an empty cache
    pub fn new(
        source: Arc<dyn IdentifierSourceEffects>,
        persistence: Arc<dyn IdentifierBatchStore>,
        clock: Arc<dyn PhysicalTimeEffects>,
    ) -> Self {
        Self {
            source,
            persistence,
            clock,
            inner: Arc::new(Mutex::new(CacheInner::default())),
        }
    }

    /// The identifier to broadcast now, or `None` when no valid one is held.
    ///
    /// Never suspends and never fetches.
    pub fn current_identifier(&self) -> Option<TempId> {
        let mut inner = self.inner.lock();
        let now = inner.observe(self.clock.as_ref());
        inner.evict(now);
        inner.batch.as_ref().and_then(|batch| batch.head().cloned())
    }

    /// Current state
    pub fn state(&self) -> CacheState {
        self.status().state
    }

    /// Current state plus batch details
    pub fn status(&self) -> CacheStatus {
        let mut inner = self.inner.lock();
        let now = inner.observe(self.clock.as_ref());
        inner.evict(now);
        CacheStatus {
            state: inner.state_at(now),
            exhausted_on_arrival: inner.exhausted_on_arrival,
            remaining: inner.batch.as_ref().map_or(0, IdentifierBatch::len),
            refresh_at: inner.batch.as_ref().map(IdentifierBatch::refresh_at),
        }
    }

    /// Install the persisted batch, if there is one and nothing is loaded yet.
    ///
    /// Returns whether a batch was installed.
    pub async fn restore(&self) -> Result<bool, IdentifierError> {
        let loaded = self
            .persistence
            .load()
            .await
            .map_err(|e| IdentifierError::PersistFailed {
                message: e.to_string(),
            })?;

        let Some(mut batch) = loaded else {
            debug!("no persisted identifier batch");
            return Ok(false);
        };

        let mut inner = self.inner.lock();
        if inner.batch.is_some() {
            debug!("batch already installed, ignoring persisted copy");
            return Ok(false);
        }
        let now = inner.observe(self.clock.as_ref());
        let evicted = batch.evict_expired(now);
        if batch.is_exhausted() {
            info!(evicted, "persisted identifier batch has fully expired");
            return Ok(false);
        }
        info!(
            identifiers = batch.len(),
            evicted,
            refresh_at = %batch.refresh_at(),
            "restored persisted identifier batch"
        );
        inner.batch = Some(batch);
        Ok(true)
    }

    /// Make sure a fresh batch is installed, fetching one if needed.
    ///
    /// Concurrent callers share one in-flight fetch and all observe its
    /// result. On any failure the previously installed batch stays in place.
    pub async fn ensure_fresh(&self) -> Result<RefreshOutcome, IdentifierError> {
        let refresh = {
            let mut inner = self.inner.lock();
            if let Some(in_flight) = inner.in_flight.clone() {
                debug!("joining in-flight identifier refresh");
                in_flight
            } else {
                let now = inner.observe(self.clock.as_ref());
                inner.evict(now);
                if inner.state_at(now) == CacheState::Fresh {
                    return Ok(RefreshOutcome::AlreadyFresh);
                }
                let refresh = run_refresh(
                    self.source.clone(),
                    self.persistence.clone(),
                    self.clock.clone(),
                    self.inner.clone(),
                )
                .boxed()
                .shared();
                inner.in_flight = Some(refresh.clone());
                refresh
            }
        };
        refresh.await
    }

    /// The identifier to broadcast, refreshing once if the batch is stale.
    ///
    /// A failed refresh still yields an old identifier that has not expired.
    /// Returns `Ok(None)` only when the refresh succeeded and nothing is usable.
    pub async fn next_identifier(&self) -> Result<Option<TempId>, IdentifierError> {
        if self.state() != CacheState::Fresh {
            if let Err(err) = self.ensure_fresh().await {
                return match self.current_identifier() {
                    Some(id) => {
                        warn!(error = %err, "refresh failed, broadcasting previous identifier");
                        Ok(Some(id))
                    }
                    None => Err(err),
                };
            }
        }
        Ok(self.current_identifier())
    }
}

async fn run_refresh(
    source: Arc<dyn IdentifierSourceEffects>,
    persistence: Arc<dyn IdentifierBatchStore>,
    clock: Arc<dyn PhysicalTimeEffects>,
    inner: Arc<Mutex<CacheInner>>,
) -> Result<RefreshOutcome, IdentifierError> {
    let result = fetch_and_install(source, persistence, clock, &inner).await;
    inner.lock().in_flight = None;
    result
}

#[tracing::instrument(level = "debug", skip_all)]
async fn fetch_and_install(
    source: Arc<dyn IdentifierSourceEffects>,
    persistence: Arc<dyn IdentifierBatchStore>,
    clock: Arc<dyn PhysicalTimeEffects>,
    inner: &Mutex<CacheInner>,
) -> Result<RefreshOutcome, IdentifierError> {
    let mut batch = source.fetch_batch().await.map_err(|e| {
        warn!(error = %e, "identifier fetch failed, keeping previous batch");
        IdentifierError::RefreshFailed {
            message: e.to_string(),
        }
    })?;

    let fetched = batch.len();
    let now = inner.lock().observe(clock.as_ref());
    let evicted_on_arrival = batch.evict_expired(now);
    if batch.is_exhausted() {
        warn!(fetched, "fetched identifier batch expired on arrival");
        inner.lock().exhausted_on_arrival = true;
        return Err(IdentifierError::BatchExhaustedOnArrival { fetched });
    }

    persistence.save(&batch).await.map_err(|e| {
        warn!(error = %e, "failed to persist identifier batch, not installing it");
        IdentifierError::PersistFailed {
            message: e.to_string(),
        }
    })?;

    let identifiers = batch.len();
    info!(
        identifiers,
        evicted_on_arrival,
        refresh_at = %batch.refresh_at(),
        "installed identifier batch"
    );
    let mut inner = inner.lock();
    inner.batch = Some(batch);
    inner.exhausted_on_arrival = false;
    Ok(RefreshOutcome::Refreshed {
        identifiers,
        evicted_on_arrival,
    })
}
