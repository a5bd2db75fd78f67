//! Error types for the kessler engine.
//!
//! All crates return `KesslerResult<T>` from fallible operations.
//! Configuration and invariant errors surface synchronously through this
//! type; per-particle numeric anomalies are instead recorded in diagnostic
//! vectors that the caller inspects after `step()`.

use thiserror::Error;

/// Unified error type for the kessler engine.
#[derive(Debug, Error)]
pub enum KesslerError {
    /// A constructor or setter argument is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The particle state vector is malformed.
    #[error("{0}")]
    InvalidState(String),

    /// The dynamics parameter vector is malformed.
    #[error("{0}")]
    InvalidParameters(String),

    /// Particle indices passed to a removal or whitelist call are invalid.
    #[error("{0}")]
    InvalidIndices(String),

    /// An internal invariant was violated. Fatal for the current step.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias for `Result<T, KesslerError>`.
pub type KesslerResult<T> = Result<T, KesslerError>;
