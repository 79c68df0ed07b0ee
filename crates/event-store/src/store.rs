//! The event store contract.

use async_trait::async_trait;

use crate::{AggregateQuery, EventEnvelope, EventId, EventStream, Result, Revision, Snapshot};

/// Core trait for event store implementations.
///
/// An event store is responsible for persisting and retrieving events and
/// snapshots, and for tracking which committed events have been handed to the
/// publisher. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns a new unique id, used for commands and aggregates without one.
    async fn get_new_id(&self) -> Result<String>;

    /// Loads the latest snapshot of a stream together with the events
    /// committed after it.
    ///
    /// Without a snapshot the returned stream holds the whole history and
    /// starts at revision 0.
    async fn get_from_snapshot(
        &self,
        query: &AggregateQuery,
    ) -> Result<(Option<Snapshot>, EventStream)>;

    /// Appends the stream's uncommitted events.
    ///
    /// Events are appended atomically - either all succeed or none do. Fails
    /// with `ConcurrencyConflict` if the stream's persisted revision moved
    /// since the stream was loaded. The returned stream has the appended
    /// events in both `events` and `events_to_dispatch`.
    async fn commit(&self, stream: EventStream) -> Result<EventStream>;

    /// Saves a snapshot, replacing any previous snapshot of the same stream.
    async fn create_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Marks a committed event as handed to the publisher.
    async fn set_event_to_dispatched(&self, event_id: EventId) -> Result<()>;

    /// Returns committed events not yet marked dispatched, in commit order.
    async fn get_undispatched_events(&self) -> Result<Vec<EventEnvelope>>;

    /// Retrieves every committed event of a stream, in revision order.
    async fn get_events(&self, query: &AggregateQuery) -> Result<Vec<EventEnvelope>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Returns the persisted revision of a stream (0 for an empty stream).
    async fn last_revision(&self, query: &AggregateQuery) -> Result<Revision> {
        let (_, stream) = self.get_from_snapshot(query).await?;
        Ok(stream.current_revision())
    }

    /// Checks if a stream has any committed events.
    async fn stream_exists(&self, query: &AggregateQuery) -> Result<bool> {
        Ok(self.last_revision(query).await? > Revision::initial())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Error returned when the events to append are not a valid continuation.
#[derive(Debug, Clone)]
pub struct AppendValidationError {
    pub message: String,
}

impl std::fmt::Display for AppendValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Append validation error: {}", self.message)
    }
}

impl std::error::Error for AppendValidationError {}

/// Validates that `events` continue `query`'s stream right after `current`.
pub fn validate_events_for_append(
    query: &AggregateQuery,
    current: Revision,
    events: &[EventEnvelope],
) -> std::result::Result<(), AppendValidationError> {
    if events.is_empty() {
        return Err(AppendValidationError {
            message: "Cannot append empty event list".to_string(),
        });
    }

    let mut expected_revision = current;
    for event in events {
        if event.aggregate_id != query.aggregate_id
            || event.aggregate != query.aggregate
            || event.context != query.context
        {
            return Err(AppendValidationError {
                message: format!("All events must belong to stream {query}"),
            });
        }

        expected_revision = expected_revision.next();
        if event.revision != expected_revision {
            return Err(AppendValidationError {
                message: format!(
                    "Event revisions must be sequential. Expected {}, got {}",
                    expected_revision, event.revision
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate: &str, revision: u64) -> EventEnvelope {
        EventEnvelope::builder()
            .name("itemAdded")
            .aggregate_id("cart-1".into())
            .aggregate(aggregate)
            .context("sale")
            .revision(Revision::new(revision))
            .build()
    }

    #[test]
    fn validate_accepts_sequential_continuation() {
        let query = AggregateQuery::new("sale", "cart", "cart-1");
        let events = vec![event("cart", 3), event("cart", 4)];
        assert!(validate_events_for_append(&query, Revision::new(2), &events).is_ok());
    }

    #[test]
    fn validate_rejects_empty_list() {
        let query = AggregateQuery::new("sale", "cart", "cart-1");
        assert!(validate_events_for_append(&query, Revision::initial(), &[]).is_err());
    }

    #[test]
    fn validate_rejects_gaps() {
        let query = AggregateQuery::new("sale", "cart", "cart-1");
        let events = vec![event("cart", 1), event("cart", 3)];
        let err = validate_events_for_append(&query, Revision::initial(), &events).unwrap_err();
        assert!(err.message.contains("sequential"));
    }

    #[test]
    fn validate_rejects_foreign_stream() {
        let query = AggregateQuery::new("sale", "cart", "cart-1");
        let events = vec![event("order", 1)];
        assert!(validate_events_for_append(&query, Revision::initial(), &events).is_err());
    }
}
