//! End-to-end agent behaviour over scripted effects

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::sync::Arc;
use std::time::Duration;
use tracer_agent::{
    AgentBuilder, AgentError, ClearStatus, CompletionOutcome, TracerAgent, UploadError,
    UploadPolicy,
};
use tracer_core::{
    AdvertisementPayload, CentralWritePayload, LifecycleEventKind, Timestamp, TracerConfig,
    UploadReceipt,
};
use tracer_effects::{MemoryEncounterStore, SimulatedTimeHandler};
use tracer_testkit::{
    batch_at, init_test_tracing, FaultyEncounterStore, ScriptedIdentifierSource,
    ScriptedUploadTransport,
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

struct Harness {
    agent: TracerAgent,
    clock: SimulatedTimeHandler,
    source: ScriptedIdentifierSource,
    transport: ScriptedUploadTransport,
}

fn config() -> TracerConfig {
    TracerConfig {
        device_uid: "device-1".into(),
        device_model: "Pixel 7".into(),
        ..TracerConfig::default()
    }
}

async fn harness_with_store(store: Arc<dyn tracer_core::effects::EncounterStoreEffects>) -> Harness {
    init_test_tracing();
    let clock = SimulatedTimeHandler::new(Timestamp::from_secs(1_700_000_000));
    let source = ScriptedIdentifierSource::new();
    source.push_batch(batch_at(clock.now(), 4, Duration::from_secs(900)));
    let transport = ScriptedUploadTransport::new();

    let agent = AgentBuilder::new(config())
        .with_clock(Arc::new(clock.clone()))
        .with_identifier_source(Arc::new(source.clone()))
        .with_upload_transport(Arc::new(transport.clone()))
        .with_encounter_store(store)
        .build()
        .await
        .unwrap();

    Harness {
        agent,
        clock,
        source,
        transport,
    }
}

async fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryEncounterStore::new())).await
}

#[tokio::test]
async fn start_and_stop_record_lifecycle_events() {
    let h = harness().await;

    h.agent.start().await.unwrap();
    assert!(h.agent.is_tracing());
    assert_eq!(h.source.fetch_count(), 1);

    h.clock.advance(Duration::from_secs(5));
    h.agent.stop().await.unwrap();
    h.agent.stop().await.unwrap();
    assert!(!h.agent.is_tracing());

    let snapshot = h.agent.ledger().records_for_upload().await.unwrap();
    let kinds: Vec<_> = snapshot.events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [LifecycleEventKind::ScanningStarted, LifecycleEventKind::ScanningStopped]
    );
}

#[tokio::test]
async fn advertisement_carries_current_identifier() {
    let h = harness().await;
    h.agent.start().await.unwrap();

    let payload = h.agent.advertisement_payload().await.unwrap().unwrap();
    assert_eq!(
        payload,
        AdvertisementPayload {
            mp: "Pixel 7".into(),
            id: "tid-0".into(),
            o: "hyperjump".into(),
            v: 2,
        }
    );

    h.clock.advance(Duration::from_secs(900));
    let payload = h.agent.advertisement_payload().await.unwrap().unwrap();
    assert_eq!(payload.id, "tid-1");
    assert_eq!(h.source.fetch_count(), 1);
}

#[tokio::test]
async fn exhausted_batch_pauses_broadcasting() {
    let h = harness().await;
    h.agent.start().await.unwrap();

    h.clock.advance(Duration::from_secs(4 * 900));
    h.source
        .push_batch(batch_at(Timestamp::from_secs(1_000), 1, Duration::from_secs(900)));

    let err = h.agent.advertisement_payload().await.unwrap_err();
    assert!(matches!(err, AgentError::Identifier(_)));
    assert!(h.agent.identifier_status().exhausted_on_arrival);
    assert_eq!(h.agent.identifiers().current_identifier(), None);
}

#[tokio::test]
async fn discovery_is_completed_from_peer_advertisement() {
    let h = harness().await;
    let peer = AdvertisementPayload {
        mp: "iPhone 14".into(),
        id: "peer-token".into(),
        o: "hyperjump".into(),
        v: 2,
    };

    let id = h.agent.record_discovery(-62.0, Some(8.0)).await.unwrap();
    assert_eq!(
        h.agent.record_peer_advertisement(id, &peer).await.unwrap(),
        CompletionOutcome::Applied
    );

    let central = CentralWritePayload {
        mc: "Galaxy S23".into(),
        rs: -71.0,
        id: "central-token".into(),
        o: "hyperjump".into(),
        v: 2,
    };
    h.agent.record_central_write(&central).await.unwrap();

    let snapshot = h.agent.ledger().records_for_upload().await.unwrap();
    assert_eq!(snapshot.records.len(), 2);
    assert!(snapshot.records.iter().all(|r| r.is_complete()));
    assert_eq!(
        snapshot.records[1].central_peripheral_models(),
        Some(("Galaxy S23", "Pixel 7"))
    );
}

#[tokio::test]
async fn completion_after_purge_is_not_an_error() {
    let h = harness().await;
    let peer = AdvertisementPayload {
        mp: "iPhone 14".into(),
        id: "peer-token".into(),
        o: "hyperjump".into(),
        v: 2,
    };

    let id = h.agent.record_discovery(-62.0, None).await.unwrap();
    h.agent.remove_all_data().await.unwrap();
    assert_eq!(
        h.agent.record_peer_advertisement(id, &peer).await.unwrap(),
        CompletionOutcome::Missing
    );
}

#[tokio::test]
async fn retention_purge_keeps_recent_records() {
    let h = harness().await;

    h.agent.record_discovery(-60.0, None).await.unwrap();
    h.clock.advance(20 * DAY);
    h.agent.record_discovery(-60.0, None).await.unwrap();
    h.clock.advance(2 * DAY);

    assert_eq!(h.agent.remove_expired_data().await.unwrap(), 1);
    assert_eq!(h.agent.count_encounters_older_than(Duration::ZERO).await.unwrap(), 1);
    assert_eq!(h.agent.count_encounters_in_the_last(3 * DAY).await.unwrap(), 1);
}

#[tokio::test]
async fn upload_retains_ledger_by_default() {
    let h = harness().await;
    h.agent.record_discovery(-60.0, None).await.unwrap();

    let summary = h
        .agent
        .upload_with_policy("424242", UploadPolicy::default())
        .await
        .unwrap();
    assert_eq!(summary.clear, ClearStatus::Retained);
    assert_eq!(summary.receipt, UploadReceipt { records: 1, events: 0 });
    assert_eq!(h.agent.count_encounters_in_the_last(DAY).await.unwrap(), 1);
    assert_eq!(h.transport.submissions()[0].device_uid, "device-1");
}

#[tokio::test]
async fn clear_policy_wipes_after_confirmed_upload() {
    let h = harness().await;
    h.agent.record_discovery(-60.0, None).await.unwrap();
    h.agent.record_discovery(-61.0, None).await.unwrap();

    let summary = h
        .agent
        .upload_with_policy("424242", UploadPolicy::ClearLedger)
        .await
        .unwrap();
    assert_eq!(summary.clear, ClearStatus::Cleared { removed: 2 });
    assert_eq!(h.agent.count_encounters_in_the_last(DAY).await.unwrap(), 0);
}

#[tokio::test]
async fn clear_failure_does_not_fail_the_upload() {
    let store = FaultyEncounterStore::new();
    let h = harness_with_store(Arc::new(store.clone())).await;
    h.agent.record_discovery(-60.0, None).await.unwrap();

    store.fail_deletes(true);
    let summary = h
        .agent
        .upload_with_policy("424242", UploadPolicy::ClearLedger)
        .await
        .unwrap();
    assert_eq!(summary.receipt.records, 1);
    assert!(matches!(summary.clear, ClearStatus::ClearFailed(_)));
    assert_eq!(store.inner().len().await, 1);
}

#[tokio::test]
async fn failed_exchange_leaves_count_unchanged() {
    let h = harness().await;
    h.agent.record_discovery(-60.0, None).await.unwrap();

    h.transport.fail_next_exchange("expired code");
    let err = h
        .agent
        .upload_with_policy("000000", UploadPolicy::ClearLedger)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::Upload(UploadError::TokenExchangeFailed { .. })
    ));
    assert_eq!(h.agent.count_encounters_in_the_last(DAY).await.unwrap(), 1);
}

#[tokio::test]
async fn identity_change_reaches_the_transport() {
    let h = harness().await;
    h.agent.set_identity("device-2");
    h.agent.upload("111111").await.unwrap();
    assert_eq!(h.agent.identity(), "device-2");
    assert_eq!(h.transport.submissions()[0].device_uid, "device-2");
}

#[tokio::test]
async fn scan_schedule_ignores_zero() {
    let h = harness().await;
    assert!(!h.agent.set_scanning_interval(0));
    assert!(h.agent.set_scanning_duration(15));
    let schedule = h.agent.scan_schedule();
    assert_eq!(schedule.interval_secs, 60);
    assert_eq!(schedule.duration_secs, 15);
}

#[tokio::test]
async fn missing_effects_are_reported() {
    let err = AgentBuilder::new(config()).build().await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::MissingEffect {
            effect: "identifier source"
        }
    ));

    let mut bad = config();
    bad.retention_days = 0;
    let err = AgentBuilder::new(bad).build().await.unwrap_err();
    assert!(matches!(err, AgentError::Config(_)));
}

#[tokio::test]
async fn data_dir_agent_survives_restart() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedTimeHandler::new(Timestamp::from_secs(1_700_000_000));
    let mut config = config();
    config.data_dir = Some(dir.path().to_path_buf());

    let source = ScriptedIdentifierSource::new();
    source.push_batch(batch_at(clock.now(), 4, Duration::from_secs(900)));
    let build = |source: &ScriptedIdentifierSource| {
        AgentBuilder::new(config.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_identifier_source(Arc::new(source.clone()))
            .with_upload_transport(Arc::new(ScriptedUploadTransport::new()))
            .build()
    };

    let first = build(&source).await.unwrap();
    first.start().await.unwrap();
    first.record_discovery(-60.0, None).await.unwrap();
    drop(first);

    let fresh_source = ScriptedIdentifierSource::new();
    let second = build(&fresh_source).await.unwrap();
    assert!(
        second.identifiers().restore().await.unwrap(),
        "persisted batch should be restored"
    );
    assert_eq!(
        second.identifiers().current_identifier().map(|id| id.token),
        Some("tid-0".to_string())
    );
    assert_eq!(second.count_encounters_in_the_last(DAY).await.unwrap(), 2);
    assert_eq!(fresh_source.fetch_count(), 0);
}
