//! Wall-clock effect
//!
//! Unlike the I/O effects this one is synchronous: identifier selection and
//! head eviction must never suspend.

use crate::time::Timestamp;
use std::sync::Arc;

/// Source of the current wall-clock instant
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current time
    fn physical_time(&self) -> Timestamp;
}

impl<T: PhysicalTimeEffects + ?Sized> PhysicalTimeEffects for Arc<T> {
    fn physical_time(&self) -> Timestamp {
        (**self).physical_time()
    }
}
