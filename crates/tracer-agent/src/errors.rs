//! Typed errors for the runtime components
//!
//! Effect handlers report [`TracerError`]; each component translates that into
//! its own taxonomy so callers can tell a failed token exchange from a failed
//! submission without string matching. All of them are `Clone` because a
//! shared in-flight refresh hands one result to every waiter.

use tracer_core::{ConfigError, RecordId, TracerError};

/// Identifier rotation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Fetching or decoding a batch failed; the previous batch is kept
    #[error("identifier refresh failed: {message}")]
    RefreshFailed {
        /// Underlying error
        message: String,
    },

    /// Every identifier in the fetched batch had already expired
    #[error("fetched batch of {fetched} identifiers was exhausted on arrival")]
    BatchExhaustedOnArrival {
        /// Identifiers in the batch as fetched
        fetched: usize,
    },

    /// The fetched batch could not be made durable, so it was not installed
    #[error("failed to persist identifier batch: {message}")]
    PersistFailed {
        /// Underlying error
        message: String,
    },
}

/// Encounter ledger failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The backing store failed; the operation was not applied
    #[error("ledger {operation} failed: {message}")]
    Io {
        /// Which ledger operation
        operation: &'static str,
        /// Underlying error
        message: String,
    },

    /// The referenced record does not exist
    #[error("{id} not found")]
    NotFound {
        /// Missing record
        id: RecordId,
    },
}

impl LedgerError {
    pub(crate) fn io(operation: &'static str) -> impl FnOnce(TracerError) -> Self {
        move |err| LedgerError::Io {
            operation,
            message: err.to_string(),
        }
    }
}

/// Upload pipeline failures; none of them touch the ledger
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// The code could not be exchanged for an upload token
    #[error("token exchange failed: {message}")]
    TokenExchangeFailed {
        /// Underlying error
        message: String,
    },

    /// The ledger snapshot could not be read; the token was discarded
    #[error("ledger read failed: {message}")]
    LedgerReadFailed {
        /// Underlying error
        message: String,
    },

    /// The backend did not confirm the submission
    #[error("submission failed: {message}")]
    SubmissionFailed {
        /// Underlying error
        message: String,
    },
}

/// Errors surfaced by the agent facade
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A required effect was neither injected nor derivable from configuration
    #[error("no {effect} configured")]
    MissingEffect {
        /// Which effect
        effect: &'static str,
    },

    /// A backing store could not be opened
    #[error("failed to open storage: {0}")]
    Storage(#[source] TracerError),

    /// Identifier rotation failure
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    /// Ledger failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Upload failure
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Result alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
