//! Error types for the QoS crate.

use thiserror::Error;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum QosError {
    /// The scheduler state lock was poisoned by a panicking holder.
    #[error("scheduler state lock poisoned: {0}")]
    LockPoisoned(String),

    /// Shutdown error.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, QosError>;
