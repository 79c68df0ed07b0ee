//! Event store errors.

use thiserror::Error;

use crate::{AggregateQuery, EventId, Revision};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A concurrency conflict occurred when committing a stream.
    /// The revision the stream was loaded at no longer matches the store.
    #[error(
        "Concurrency conflict on stream {stream}: expected revision {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        stream: AggregateQuery,
        expected: Revision,
        actual: Revision,
    },

    /// The events handed to `commit` do not form a valid append.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The referenced event does not exist.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
