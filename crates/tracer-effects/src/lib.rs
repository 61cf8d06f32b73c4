//! Tracer Effects - handler implementations
//!
//! Concrete handlers for the effect traits declared in `tracer-core`:
//!
//! - [`time`]: real and simulated wall clocks
//! - [`store`]: in-memory and filesystem encounter stores, plus batch persistence
//! - [`http`]: the reqwest backend client acting as identifier source and upload transport
//!
//! Handlers are stateless wrappers around their backing resource and are
//! shared as `Arc<dyn _>` by the runtime.

#![forbid(unsafe_code)]

pub mod http;
pub mod store;
pub mod time;

pub use http::{ApiError, DeviceIdentity, HttpTraceClient};
pub use store::{
    FilesystemBatchStore, FilesystemEncounterStore, MemoryBatchStore, MemoryEncounterStore,
};
pub use time::{RealTimeHandler, SimulatedTimeHandler};
