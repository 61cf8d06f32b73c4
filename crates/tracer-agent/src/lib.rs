//! # Tracer Agent - identity and record management runtime
//!
//! Three components, composed by [`TracerAgent`]:
//!
//! - [`IdentifierRotationCache`]: answers "what do I broadcast right now",
//!   lazily evicting expired identifiers and refreshing at most once per
//!   staleness episode
//! - [`EncounterLedger`]: append-only local history of proximity observations
//!   and lifecycle events, bounded by the retention TTL
//! - [`UploadPipeline`]: code-for-token exchange, consistent ledger snapshot,
//!   single submission; never deletes local data
//!
//! Effects are injected through [`AgentBuilder`]; there are no process-wide
//! singletons.

#![forbid(unsafe_code)]

pub mod agent;
pub mod errors;
pub mod ledger;
pub mod rotation;
pub mod telemetry;
pub mod upload;

pub use agent::{AgentBuilder, ClearStatus, TracerAgent, UploadPolicy, UploadSummary};
pub use errors::{AgentError, AgentResult, IdentifierError, LedgerError, UploadError};
pub use ledger::{CompletionOutcome, EncounterLedger, UploadSnapshot};
pub use rotation::{CacheState, CacheStatus, IdentifierRotationCache, RefreshOutcome};
pub use upload::UploadPipeline;
