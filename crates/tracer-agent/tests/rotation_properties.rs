//! Rotation cache invariants under concurrency and arbitrary clock movement

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use futures::future::join_all;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracer_agent::{CacheState, IdentifierRotationCache, RefreshOutcome};
use tracer_core::effects::IdentifierBatchStore;
use tracer_core::Timestamp;
use tracer_effects::{MemoryBatchStore, SimulatedTimeHandler};
use tracer_testkit::{batch_at, init_test_tracing, ScriptedIdentifierSource};

fn cache_over(
    source: &ScriptedIdentifierSource,
    store: &MemoryBatchStore,
    clock: &SimulatedTimeHandler,
) -> IdentifierRotationCache {
    IdentifierRotationCache::new(
        Arc::new(source.clone()),
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
    )
}

#[tokio::test]
async fn concurrent_refreshes_share_one_fetch() {
    init_test_tracing();
    let clock = SimulatedTimeHandler::new(Timestamp::from_secs(1_000));
    let source = ScriptedIdentifierSource::new();
    source.push_batch(batch_at(Timestamp::from_secs(1_000), 4, Duration::from_secs(900)));
    let gate = source.hold_fetches();
    let cache = cache_over(&source, &MemoryBatchStore::new(), &clock);

    let callers = join_all((0..8).map(|_| cache.ensure_fresh()));
    let release = async {
        tokio::task::yield_now().await;
        assert_eq!(cache.state(), CacheState::Refreshing);
        gate.release();
    };
    let (results, ()) = tokio::join!(callers, release);

    assert_eq!(source.fetch_count(), 1);
    for result in results {
        assert_eq!(
            result.unwrap(),
            RefreshOutcome::Refreshed {
                identifiers: 4,
                evicted_on_arrival: 0
            }
        );
    }
    assert_eq!(cache.state(), CacheState::Fresh);
}

#[tokio::test]
async fn failed_shared_refresh_reaches_every_caller() {
    let clock = SimulatedTimeHandler::new(Timestamp::from_secs(1_000));
    let source = ScriptedIdentifierSource::new();
    source.push_failure("backend down");
    let gate = source.hold_fetches();
    let cache = cache_over(&source, &MemoryBatchStore::new(), &clock);

    let callers = join_all((0..3).map(|_| cache.ensure_fresh()));
    let release = async {
        tokio::task::yield_now().await;
        gate.release();
    };
    let (results, ()) = tokio::join!(callers, release);
    assert_eq!(source.fetch_count(), 1);
    assert!(results.iter().all(Result::is_err));
    assert_eq!(cache.state(), CacheState::Empty);
}

#[tokio::test]
async fn new_episode_after_failure_fetches_again() {
    let clock = SimulatedTimeHandler::new(Timestamp::from_secs(1_000));
    let source = ScriptedIdentifierSource::new();
    source.push_failure("backend down");
    source.push_batch(batch_at(Timestamp::from_secs(1_000), 2, Duration::from_secs(900)));
    let cache = cache_over(&source, &MemoryBatchStore::new(), &clock);

    assert!(cache.ensure_fresh().await.is_err());
    assert!(cache.ensure_fresh().await.is_ok());
    assert_eq!(source.fetch_count(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn selection_never_returns_expired_identifier(
        count in 1usize..8,
        window_secs in 1u64..600,
        steps in prop::collection::vec(-900i64..2_000, 1..40),
    ) {
        let start = Timestamp::from_secs(100_000);
        let clock = SimulatedTimeHandler::new(start);
        let store = MemoryBatchStore::new();
        let cache = cache_over(&ScriptedIdentifierSource::new(), &store, &clock);

        futures::executor::block_on(async {
            store
                .save(&batch_at(start, count, Duration::from_secs(window_secs)))
                .await
                .unwrap();
            cache.restore().await.unwrap();
        });

        let mut high_water = clock.now();
        let mut last_index = 0usize;
        for step in steps {
            let delta = Duration::from_secs(step.unsigned_abs());
            if step >= 0 {
                clock.advance(delta);
            } else {
                clock.rewind(delta);
            }
            high_water = high_water.max(clock.now());

            if let Some(id) = cache.current_identifier() {
                prop_assert!(id.valid_until > high_water);
                let index: usize = id.token.trim_start_matches("tid-").parse().unwrap();
                prop_assert!(index >= last_index);
                last_index = index;
            } else {
                last_index = usize::MAX;
                prop_assert!(cache.state() != CacheState::Fresh);
            }
        }
    }
}
