//! Error types for the lineage engine
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

use crate::experiment::RunStatus;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Lineage engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed identifier or missing/blank required field
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Experiment, branch or run does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation or lost a concurrent conditional write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Status change outside the run state machine
    #[error("Invalid run transition: {from} -> {to}\nRuns move queued -> running -> completed|failed|cancelled")]
    InvalidTransition {
        /// Current status
        from: RunStatus,
        /// Requested status
        to: RunStatus,
    },

    /// Backing store unreachable (surfaced, never retried internally)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// `true` for errors produced by a stale conditional write.
    ///
    /// The engine retries these; every other variant is returned to the caller.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
