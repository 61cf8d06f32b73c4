//! Simulated time handler for testing

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracer_core::effects::PhysicalTimeEffects;
use tracer_core::Timestamp;

/// Manually driven clock.
///
/// Clones share the same underlying time, so a test can hold one handle while
/// the runtime holds another.
#[derive(Debug, Clone)]
pub struct SimulatedTimeHandler {
    current_time: Arc<Mutex<Timestamp>>,
}

impl SimulatedTimeHandler {
    /// Start at the given instant
    pub fn new(start: Timestamp) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at the Unix epoch
    pub fn new_at_epoch() -> Self {
        Self::new(Timestamp::EPOCH)
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        let mut time = self.current_time.lock();
        *time = time.saturating_add(duration);
    }

    /// Move time backward, as a skewed system clock would
    pub fn rewind(&self, duration: Duration) {
        let mut time = self.current_time.lock();
        *time = time.saturating_sub(duration);
    }

    /// Jump to an absolute instant
    pub fn set_time(&self, time: Timestamp) {
        *self.current_time.lock() = time;
    }

    /// Current simulated instant
    pub fn now(&self) -> Timestamp {
        *self.current_time.lock()
    }
}

impl Default for SimulatedTimeHandler {
    fn default() -> Self {
        Self::new_at_epoch()
    }
}

impl PhysicalTimeEffects for SimulatedTimeHandler {
    fn physical_time(&self) -> Timestamp {
        self.now()
    }
}
