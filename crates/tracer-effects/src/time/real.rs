//! Real time handler for production use

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracer_core::effects::PhysicalTimeEffects;
use tracer_core::Timestamp;

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

impl PhysicalTimeEffects for RealTimeHandler {
    fn physical_time(&self) -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timestamp::from_millis(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}
