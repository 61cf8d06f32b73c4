//! Time-windowed broadcast identifiers
//!
//! A [`TempId`] is an opaque, server-issued token valid for a short window. The
//! backend hands them out in batches sorted by window start; the batch carries
//! its own refresh instant, independent of any single identifier's expiry.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A single broadcast identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempId {
    /// Opaque token advertised to nearby devices
    pub token: String,
    /// Start of the validity window
    pub valid_from: Timestamp,
    /// End of the validity window (exclusive)
    pub valid_until: Timestamp,
}

impl TempId {
    /// Create an identifier
    pub fn new(token: impl Into<String>, valid_from: Timestamp, valid_until: Timestamp) -> Self {
        Self {
            token: token.into(),
            valid_from,
            valid_until,
        }
    }

    /// Whether the window has closed at `now`
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.valid_until <= now
    }
}

/// Reasons a batch is rejected on construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// No identifiers were supplied
    #[error("identifier batch is empty")]
    Empty,

    /// An identifier's window does not open before it closes
    #[error("identifier {index} has valid_from >= valid_until")]
    InvalidWindow {
        /// Position of the offending identifier
        index: usize,
    },

    /// Identifiers are not sorted by window start
    #[error("identifier {index} starts before its predecessor")]
    Unsorted {
        /// Position of the first out-of-order identifier
        index: usize,
    },
}

/// Ordered identifiers plus the instant the next batch is due
///
/// Only the head is ever removed in place; everything else is replaced
/// wholesale by fetching a new batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBatch", into = "RawBatch")]
pub struct IdentifierBatch {
    identifiers: VecDeque<TempId>,
    refresh_at: Timestamp,
}

impl IdentifierBatch {
    /// Validate and build a batch
    pub fn new(identifiers: Vec<TempId>, refresh_at: Timestamp) -> Result<Self, BatchError> {
        if identifiers.is_empty() {
            return Err(BatchError::Empty);
        }

        for (index, id) in identifiers.iter().enumerate() {
            if id.valid_from >= id.valid_until {
                return Err(BatchError::InvalidWindow { index });
            }
        }

        if let Some(index) = identifiers
            .windows(2)
            .position(|pair| pair[1].valid_from < pair[0].valid_from)
        {
            return Err(BatchError::Unsorted { index: index + 1 });
        }

        Ok(Self {
            identifiers: identifiers.into(),
            refresh_at,
        })
    }

    /// Drop head entries whose window closed at or before `now`.
    ///
    /// Stops at the first live head; entries behind it are never inspected.
    /// Returns the number of entries removed.
    pub fn evict_expired(&mut self, now: Timestamp) -> usize {
        let mut evicted = 0;
        while self
            .identifiers
            .front()
            .is_some_and(|head| head.is_expired_at(now))
        {
            self.identifiers.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The current head, if any entries remain
    pub fn head(&self) -> Option<&TempId> {
        self.identifiers.front()
    }

    /// When the next batch should be fetched
    pub fn refresh_at(&self) -> Timestamp {
        self.refresh_at
    }

    /// Whether `now` has reached the refresh instant
    pub fn is_refresh_due(&self, now: Timestamp) -> bool {
        now >= self.refresh_at
    }

    /// Whether eviction has consumed every entry
    pub fn is_exhausted(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Remaining entries
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// Same as [`Self::is_exhausted`]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Remaining entries in broadcast order
    pub fn identifiers(&self) -> impl Iterator<Item = &TempId> + '_ {
        self.identifiers.iter()
    }
}

#[derive(Serialize, Deserialize)]
struct RawBatch {
    identifiers: Vec<TempId>,
    refresh_at: Timestamp,
}

impl TryFrom<RawBatch> for IdentifierBatch {
    type Error = BatchError;

    fn try_from(raw: RawBatch) -> Result<Self, Self::Error> {
        IdentifierBatch::new(raw.identifiers, raw.refresh_at)
    }
}

impl From<IdentifierBatch> for RawBatch {
    fn from(batch: IdentifierBatch) -> Self {
        RawBatch {
            identifiers: batch.identifiers.into(),
            refresh_at: batch.refresh_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(token: &str, from: u64, until: u64) -> TempId {
        TempId::new(token, Timestamp::from_secs(from), Timestamp::from_secs(until))
    }

    #[test]
    fn rejects_malformed_batches() {
        assert_eq!(
            IdentifierBatch::new(vec![], Timestamp::EPOCH),
            Err(BatchError::Empty)
        );
        assert_eq!(
            IdentifierBatch::new(vec![id("a", 10, 10)], Timestamp::EPOCH),
            Err(BatchError::InvalidWindow { index: 0 })
        );
        assert_eq!(
            IdentifierBatch::new(vec![id("a", 10, 20), id("b", 5, 30)], Timestamp::EPOCH),
            Err(BatchError::Unsorted { index: 1 })
        );
    }

    #[test]
    fn eviction_is_strictly_head_first() {
        // "b" outlives "c" but sits ahead of it; eviction must not skip over a live head
        let mut batch = IdentifierBatch::new(
            vec![id("a", 0, 10), id("b", 5, 100), id("c", 6, 20)],
            Timestamp::from_secs(50),
        )
        .unwrap();

        assert_eq!(batch.evict_expired(Timestamp::from_secs(30)), 1);
        assert_eq!(batch.head().map(|t| t.token.as_str()), Some("b"));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn window_end_is_exclusive() {
        let mut batch =
            IdentifierBatch::new(vec![id("a", 0, 10)], Timestamp::from_secs(5)).unwrap();
        assert_eq!(batch.evict_expired(Timestamp::from_millis(9_999)), 0);
        assert_eq!(batch.evict_expired(Timestamp::from_secs(10)), 1);
        assert!(batch.is_exhausted());
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{"identifiers":[],"refresh_at":0}"#;
        assert!(serde_json::from_str::<IdentifierBatch>(json).is_err());

        let batch = IdentifierBatch::new(vec![id("a", 0, 10)], Timestamp::from_secs(5)).unwrap();
        let encoded = serde_json::to_string(&batch).unwrap();
        assert_eq!(
            serde_json::from_str::<IdentifierBatch>(&encoded).unwrap(),
            batch
        );
    }

    fn arb_batch() -> impl Strategy<Value = IdentifierBatch> {
        prop::collection::vec((0u64..10_000, 1u64..5_000), 1..32).prop_map(|windows| {
            let mut start = 0;
            let ids = windows
                .into_iter()
                .enumerate()
                .map(|(i, (gap, len))| {
                    start += gap;
                    id(&format!("t{i}"), start, start + len)
                })
                .collect();
            IdentifierBatch::new(ids, Timestamp::from_secs(start)).unwrap()
        })
    }

    proptest! {
        #[test]
        fn head_is_never_expired_after_eviction(mut batch in arb_batch(), now in 0u64..200_000) {
            let now = Timestamp::from_secs(now);
            batch.evict_expired(now);
            if let Some(head) = batch.head() {
                prop_assert!(head.valid_until > now);
            }
        }

        #[test]
        fn eviction_only_shrinks(mut batch in arb_batch(), a in 0u64..200_000, b in 0u64..200_000) {
            let (early, late) = (a.min(b), a.max(b));
            batch.evict_expired(Timestamp::from_secs(late));
            let after_late = batch.len();
            batch.evict_expired(Timestamp::from_secs(early));
            prop_assert_eq!(batch.len(), after_late);
        }
    }
}
