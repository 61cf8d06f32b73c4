//! Pure effect interfaces consumed by the tracing runtime
//!
//! # Effect Classification
//!
//! - **Infrastructure**: [`PhysicalTimeEffects`], [`EncounterStoreEffects`],
//!   [`IdentifierBatchStore`]
//! - **Remote collaborators**: [`IdentifierSourceEffects`], [`UploadTransportEffects`]
//!
//! Implementations live in `tracer-effects`; scripted fakes live in
//! `tracer-testkit`. Every trait is object safe and used as `Arc<dyn _>`.

pub mod identifier;
pub mod store;
pub mod time;
pub mod upload;

pub use identifier::{IdentifierBatchStore, IdentifierSourceEffects};
pub use store::EncounterStoreEffects;
pub use time::PhysicalTimeEffects;
pub use upload::UploadTransportEffects;
