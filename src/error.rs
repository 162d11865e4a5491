//! Error types for cellsched
//!
//! Two error classes matter here: configuration errors (the offending
//! entity is rejected, prior state is retained) and capacity violations
//! (internal invariant breaches that refuse the mutation). Infeasible
//! placement is a normal return value, never an error.

use thiserror::Error;

use crate::capacity::CapacityVector;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scheduler operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration: malformed allocation path, unknown parent,
    /// bad topology reference
    #[error("configuration error: {0}")]
    Config(String),

    /// Capacity invariant violation: a mutation that would over-commit a
    /// server was refused. Callers must check feasibility first.
    #[error("capacity violation on {server}: demand {demand} exceeds free {free}")]
    CapacityViolation {
        /// Server that refused the placement
        server: String,
        /// Demand vector of the rejected instance
        demand: CapacityVector,
        /// Free capacity at the time of the attempt
        free: CapacityVector,
    },

    /// Operation applied to an entity in the wrong state, e.g. evicting an
    /// instance that is not placed
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Serialization error surfaced from report rendering
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registration failure
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Internal error (should not occur in normal operation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
