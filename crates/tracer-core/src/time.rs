//! Wall-clock instants
//!
//! Every time domain in the core (identifier windows, record timestamps,
//! retention cutoffs) is expressed as milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Milliseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create a timestamp from milliseconds since the epoch
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Create a timestamp from whole seconds since the epoch
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Create a timestamp from fractional seconds, as issued by the backend.
    ///
    /// Negative and non-finite inputs clamp to the epoch.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::EPOCH;
        }
        Self((secs * 1000.0).round() as u64)
    }

    /// Milliseconds since the epoch
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Whole seconds since the epoch, truncated
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    /// Fractional seconds since the epoch
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// `self - duration`, clamped at the epoch
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// `self + duration`, clamped at `u64::MAX`
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_arithmetic_clamps() {
        let t = Timestamp::from_secs(10);
        assert_eq!(t.saturating_sub(Duration::from_secs(60)), Timestamp::EPOCH);
        assert_eq!(
            Timestamp::from_millis(u64::MAX - 1).saturating_add(Duration::from_secs(1)),
            Timestamp::from_millis(u64::MAX)
        );
        assert_eq!(
            t.saturating_duration_since(Timestamp::from_secs(20)),
            Duration::ZERO
        );
    }

    #[test]
    fn fractional_seconds_round_to_millis() {
        assert_eq!(Timestamp::from_secs_f64(1.2345).as_millis(), 1235);
        assert_eq!(Timestamp::from_secs_f64(-3.0), Timestamp::EPOCH);
        assert_eq!(Timestamp::from_secs_f64(f64::NAN), Timestamp::EPOCH);
        assert_eq!(Timestamp::from_millis(1999).as_secs(), 1);
    }
}
