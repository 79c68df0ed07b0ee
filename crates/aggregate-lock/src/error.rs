//! Aggregate lock errors.

use thiserror::Error;

/// Errors that can occur when interacting with an aggregate lock backend.
#[derive(Debug, Error)]
pub enum LockError {
    /// The backend was used before `connect` or after `disconnect`.
    #[error("Aggregate lock is not connected")]
    NotConnected,

    /// The backend failed to serve the request.
    #[error("Aggregate lock backend error: {0}")]
    Backend(String),
}

/// Result type for aggregate lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
