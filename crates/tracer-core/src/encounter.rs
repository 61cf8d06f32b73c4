//! Encounter records
//!
//! A proximity record starts "thin" (timestamp and signal only) when a peer is
//! first observed, and is completed once the peer hands over its identifier.
//! Completion only ever fills unset fields; nothing is retracted.
//!
//! Lifecycle records mark scanning start/stop and never complete.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque store-assigned record reference.
///
/// Stores hand these out in strictly increasing order, so the id doubles as
/// the insertion sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Wrap a raw sequence number
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// The raw sequence number
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The id following this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record-{}", self.0)
    }
}

/// Which side of the radio exchange produced a proximity record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationRole {
    /// We scanned and discovered the peer
    Central,
    /// The peer connected to us and wrote its payload
    Peripheral,
}

/// Process lifecycle markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    /// Scanning was switched on
    #[serde(rename = "Scanning started")]
    ScanningStarted,
    /// Scanning was switched off
    #[serde(rename = "Scanning stopped")]
    ScanningStopped,
}

impl LifecycleEventKind {
    /// Wire label carried in the exported `msg` field
    pub fn label(self) -> &'static str {
        match self {
            LifecycleEventKind::ScanningStarted => "Scanning started",
            LifecycleEventKind::ScanningStopped => "Scanning stopped",
        }
    }
}

/// Peer-dependent fields filled in on completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerFields {
    /// Remote device model string
    pub remote_device_model: Option<String>,
    /// Identifier the peer was broadcasting
    pub peer_token: Option<String>,
    /// Peer's organization tag
    pub organization_id: Option<String>,
    /// Peer's protocol version
    pub protocol_version: Option<u32>,
}

impl PeerFields {
    /// Fields carried by a peer's advertisement
    pub fn from_advertisement(payload: &AdvertisementPayload) -> Self {
        Self {
            remote_device_model: Some(payload.mp.clone()),
            peer_token: Some(payload.id.clone()),
            organization_id: Some(payload.o.clone()),
            protocol_version: Some(payload.v),
        }
    }
}

/// A single proximity observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityRecord {
    timestamp: Timestamp,
    role: ObservationRole,
    local_device_model: String,
    signal_strength: f64,
    transmit_power: Option<f64>,
    remote_device_model: Option<String>,
    peer_token: Option<String>,
    organization_id: Option<String>,
    protocol_version: Option<u32>,
}

impl ProximityRecord {
    /// A thin record for a peer we discovered but have not exchanged with yet.
    ///
    /// A non-finite RSSI is stored as `0.0` and a non-finite transmit power
    /// as absent, so every record survives a JSON round trip.
    pub fn observed(
        timestamp: Timestamp,
        local_device_model: impl Into<String>,
        signal_strength: f64,
        transmit_power: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            role: ObservationRole::Central,
            local_device_model: local_device_model.into(),
            signal_strength: finite_or_zero(signal_strength),
            transmit_power: transmit_power.filter(|power| power.is_finite()),
            remote_device_model: None,
            peer_token: None,
            organization_id: None,
            protocol_version: None,
        }
    }

    /// A complete record built from a payload a remote central wrote to us
    pub fn from_central_write(
        timestamp: Timestamp,
        local_device_model: impl Into<String>,
        payload: &CentralWritePayload,
    ) -> Self {
        Self {
            timestamp,
            role: ObservationRole::Peripheral,
            local_device_model: local_device_model.into(),
            signal_strength: finite_or_zero(payload.rs),
            transmit_power: None,
            remote_device_model: Some(payload.mc.clone()),
            peer_token: Some(payload.id.clone()),
            organization_id: Some(payload.o.clone()),
            protocol_version: Some(payload.v),
        }
    }

    /// Fill every still-unset peer field from `fields`.
    ///
    /// Returns whether anything changed. Already-set fields are left alone.
    pub fn complete(&mut self, fields: &PeerFields) -> bool {
        let mut changed = false;
        changed |= fill(&mut self.remote_device_model, &fields.remote_device_model);
        changed |= fill(&mut self.peer_token, &fields.peer_token);
        changed |= fill(&mut self.organization_id, &fields.organization_id);
        changed |= fill(&mut self.protocol_version, &fields.protocol_version);
        changed
    }

    /// Whether the peer handed over its identifier
    pub fn is_complete(&self) -> bool {
        self.peer_token.is_some()
    }

    /// Observation instant
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Which side of the exchange we were on
    pub fn role(&self) -> ObservationRole {
        self.role
    }

    /// Our own device model
    pub fn local_device_model(&self) -> &str {
        &self.local_device_model
    }

    /// Peer device model, once known
    pub fn remote_device_model(&self) -> Option<&str> {
        self.remote_device_model.as_deref()
    }

    /// RSSI at observation time
    pub fn signal_strength(&self) -> f64 {
        self.signal_strength
    }

    /// Advertised transmit power, if the peer included it
    pub fn transmit_power(&self) -> Option<f64> {
        self.transmit_power
    }

    /// Identifier the peer was broadcasting
    pub fn peer_token(&self) -> Option<&str> {
        self.peer_token.as_deref()
    }

    /// Peer's organization tag
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    /// Peer's protocol version
    pub fn protocol_version(&self) -> Option<u32> {
        self.protocol_version
    }

    /// Model strings in (central, peripheral) order, if both are known
    pub fn central_peripheral_models(&self) -> Option<(&str, &str)> {
        let remote = self.remote_device_model.as_deref()?;
        let local = self.local_device_model.as_str();
        Some(match self.role {
            ObservationRole::Central => (local, remote),
            ObservationRole::Peripheral => (remote, local),
        })
    }
}

/// JSON has no NaN or infinity
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) -> bool {
    match (slot.as_ref(), value) {
        (None, Some(v)) => {
            *slot = Some(v.clone());
            true
        }
        _ => false,
    }
}

/// A scanning lifecycle marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// When the transition happened
    pub timestamp: Timestamp,
    /// Which transition
    pub kind: LifecycleEventKind,
}

/// Anything the ledger stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncounterRecord {
    /// A peer observation
    Proximity(ProximityRecord),
    /// A lifecycle marker
    Lifecycle(LifecycleEvent),
}

impl EncounterRecord {
    /// Lifecycle record at `timestamp`
    pub fn event(timestamp: Timestamp, kind: LifecycleEventKind) -> Self {
        Self::Lifecycle(LifecycleEvent { timestamp, kind })
    }

    /// The record's immutable timestamp
    pub fn timestamp(&self) -> Timestamp {
        match self {
            EncounterRecord::Proximity(r) => r.timestamp,
            EncounterRecord::Lifecycle(e) => e.timestamp,
        }
    }

    /// Whether this is a lifecycle marker
    pub fn is_event(&self) -> bool {
        matches!(self, EncounterRecord::Lifecycle(_))
    }

    /// Apply an in-place update, returning what happened
    pub fn apply(&mut self, update: &RecordUpdate) -> UpdateOutcome {
        match (self, update) {
            (EncounterRecord::Proximity(record), RecordUpdate::Complete(fields)) => {
                if record.complete(fields) {
                    UpdateOutcome::Changed
                } else {
                    UpdateOutcome::Unchanged
                }
            }
            (EncounterRecord::Lifecycle(_), RecordUpdate::Complete(_)) => UpdateOutcome::NotApplicable,
        }
    }
}

/// In-place mutations a store can apply to an existing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordUpdate {
    /// Fill peer-dependent fields
    Complete(PeerFields),
}

/// Result of applying a [`RecordUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// At least one field moved from unset to set
    Changed,
    /// Every field was already set
    Unchanged,
    /// The update does not apply to this kind of record
    NotApplicable,
}

/// A record together with its store reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEncounter {
    /// Store reference, also the insertion sequence
    pub id: RecordId,
    /// The record itself
    pub record: EncounterRecord,
}

/// Predicate used by store count and delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Match records with `timestamp < before`
    pub before: Option<Timestamp>,
    /// Match records with `timestamp >= at_or_after`
    pub at_or_after: Option<Timestamp>,
    /// Match records inserted before this id
    pub inserted_before: Option<RecordId>,
}

impl RecordFilter {
    /// Every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Records strictly older than `cutoff`
    pub fn older_than(cutoff: Timestamp) -> Self {
        Self {
            before: Some(cutoff),
            ..Self::default()
        }
    }

    /// Records at or after `cutoff`
    pub fn since(cutoff: Timestamp) -> Self {
        Self {
            at_or_after: Some(cutoff),
            ..Self::default()
        }
    }

    /// Restrict to records inserted before `watermark`
    pub fn inserted_before(mut self, watermark: RecordId) -> Self {
        self.inserted_before = Some(watermark);
        self
    }

    /// Whether `stored` satisfies every set bound
    pub fn matches(&self, stored: &StoredEncounter) -> bool {
        let ts = stored.record.timestamp();
        self.before.map_or(true, |b| ts < b)
            && self.at_or_after.map_or(true, |a| ts >= a)
            && self.inserted_before.map_or(true, |w| stored.id < w)
    }
}

/// What a device puts on air: model, current identifier, org and version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementPayload {
    /// Local device model
    pub mp: String,
    /// Current identifier token
    pub id: String,
    /// Organization tag
    pub o: String,
    /// Protocol version
    pub v: u32,
}

impl AdvertisementPayload {
    /// JSON bytes for the characteristic value
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a peer's characteristic value
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// What a remote central writes to our characteristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralWritePayload {
    /// Central device model
    pub mc: String,
    /// RSSI the central measured
    pub rs: f64,
    /// Central's identifier token
    pub id: String,
    /// Organization tag
    pub o: String,
    /// Protocol version
    pub v: u32,
}

impl CentralWritePayload {
    /// Parse the written bytes
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
