//! Loaded event streams and their pending appends.

use crate::{AggregateQuery, EventEnvelope, Revision};

/// An aggregate's event stream as loaded from the store.
///
/// `events` holds the committed events newer than the snapshot the stream was
/// loaded with (or the whole history when there was none). New events are
/// staged with [`EventStream::add_event`] and written by
/// [`EventStore::commit`](crate::EventStore::commit), which moves them to
/// `events_to_dispatch`.
#[derive(Debug, Clone)]
pub struct EventStream {
    /// The stream this instance belongs to.
    pub query: AggregateQuery,

    /// Revision the stream starts from (the snapshot revision, or 0).
    pub base_revision: Revision,

    /// Committed events, in revision order.
    pub events: Vec<EventEnvelope>,

    /// Events staged for the next commit.
    pub uncommitted: Vec<EventEnvelope>,

    /// Events written by the last commit that still need publishing.
    pub events_to_dispatch: Vec<EventEnvelope>,
}

impl EventStream {
    /// Creates a stream holding already committed events.
    pub fn new(query: AggregateQuery, base_revision: Revision, events: Vec<EventEnvelope>) -> Self {
        Self {
            query,
            base_revision,
            events,
            uncommitted: Vec::new(),
            events_to_dispatch: Vec::new(),
        }
    }

    /// Stages an event for the next commit.
    pub fn add_event(&mut self, event: EventEnvelope) {
        self.uncommitted.push(event);
    }

    /// Stages several events for the next commit.
    pub fn add_events(&mut self, events: impl IntoIterator<Item = EventEnvelope>) {
        self.uncommitted.extend(events);
    }

    /// Revision of the last committed event this stream knows about.
    pub fn current_revision(&self) -> Revision {
        self.events
            .last()
            .map(|e| e.revision)
            .unwrap_or(self.base_revision)
    }
}
