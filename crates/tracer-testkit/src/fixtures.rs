//! Fixture builders

use std::time::Duration;
use tracer_core::{IdentifierBatch, PeerFields, TempId, Timestamp};

/// `count` back-to-back identifiers `tid-0..` starting at `start`, each valid
/// for `window`. The batch asks for a refresh when its last window opens.
pub fn batch_at(start: Timestamp, count: usize, window: Duration) -> IdentifierBatch {
    let ids: Vec<TempId> = (0..count)
        .map(|i| {
            let from = start.saturating_add(window * i as u32);
            TempId::new(format!("tid-{i}"), from, from.saturating_add(window))
        })
        .collect();
    let refresh_at = ids.last().map_or(start, |id| id.valid_from);
    IdentifierBatch::new(ids, refresh_at).expect("fixture batch is well formed")
}

/// Peer fields as a full advertisement would supply them
pub fn peer_fields(token: &str) -> PeerFields {
    PeerFields {
        remote_device_model: Some("iPhone 14".to_string()),
        peer_token: Some(token.to_string()),
        organization_id: Some("hyperjump".to_string()),
        protocol_version: Some(2),
    }
}

/// Route tracing output through the test harness; repeat calls are no-ops
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
