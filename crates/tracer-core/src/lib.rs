//! Tracer Core - foundation types and effect interfaces
//!
//! This crate holds everything the tracing client core agrees on before any
//! handler or runtime exists:
//!
//! - **Time**: [`Timestamp`], millisecond wall-clock instants with saturating arithmetic
//! - **Identifiers**: [`TempId`] and [`IdentifierBatch`], the rotating broadcast tokens
//! - **Encounters**: [`EncounterRecord`] and its monotonic completion rule
//! - **Upload**: [`UploadBatch`] and the exported wire shape of each record
//! - **Configuration**: [`TracerConfig`] with TOML loading and environment overrides
//! - **Effects**: the traits the runtime consumes (clock, identifier source,
//!   upload transport, encounter store, batch persistence)
//!
//! # Architecture Constraints
//!
//! - YES pure domain types and validation
//! - YES effect trait signatures
//! - NO effect handler implementations (those live in `tracer-effects`)
//! - NO orchestration (that is `tracer-agent`)

#![forbid(unsafe_code)]

/// Configuration surface read by the core
pub mod config;

/// Encounter records and their completion rules
pub mod encounter;

/// Pure effect interfaces (no implementations)
pub mod effects;

/// Unified error handling
pub mod errors;

/// Time-windowed broadcast identifiers
pub mod identifier;

/// Wall-clock instants
pub mod time;

/// Upload batches and exported record shapes
pub mod upload;

pub use config::{ConfigError, ScanSchedule, TracerConfig};
pub use encounter::{
    AdvertisementPayload, CentralWritePayload, EncounterRecord, LifecycleEvent,
    LifecycleEventKind, ObservationRole, PeerFields, ProximityRecord, RecordFilter, RecordId,
    RecordUpdate, StoredEncounter, UpdateOutcome,
};
pub use errors::{Result, TracerError};
pub use identifier::{BatchError, IdentifierBatch, TempId};
pub use time::Timestamp;
pub use upload::{ExportedEncounter, UploadBatch, UploadReceipt};
