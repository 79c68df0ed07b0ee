//! In-memory event store for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateQuery, EventEnvelope, EventId, EventStoreError, EventStream, Result, Revision,
    Snapshot,
    store::{EventStore, validate_events_for_append},
};

/// In-memory event store implementation.
///
/// Stores all events in memory and provides the same interface as a
/// persistent backend. Clones share the same underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
    undispatched: Arc<RwLock<Vec<EventId>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns the number of stored snapshots.
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Clears all events and snapshots.
    pub async fn clear(&self) {
        self.events.write().await.clear();
        self.snapshots.write().await.clear();
        self.undispatched.write().await.clear();
    }

    fn stream_events(store: &[EventEnvelope], query: &AggregateQuery) -> Vec<EventEnvelope> {
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| {
                e.aggregate_id == query.aggregate_id
                    && e.aggregate == query.aggregate
                    && e.context == query.context
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.revision);
        events
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get_new_id(&self) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    #[tracing::instrument(skip(self), fields(stream = %query))]
    async fn get_from_snapshot(
        &self,
        query: &AggregateQuery,
    ) -> Result<(Option<Snapshot>, EventStream)> {
        let snapshot = self
            .snapshots
            .read()
            .await
            .get(&query.stream_key())
            .cloned();
        let base_revision = snapshot
            .as_ref()
            .map(|s| s.revision)
            .unwrap_or(Revision::initial());

        let store = self.events.read().await;
        let events: Vec<_> = Self::stream_events(&store, query)
            .into_iter()
            .filter(|e| e.revision > base_revision)
            .collect();

        Ok((
            snapshot,
            EventStream::new(query.clone(), base_revision, events),
        ))
    }

    #[tracing::instrument(skip(self, stream), fields(stream = %stream.query, count = stream.uncommitted.len()))]
    async fn commit(&self, mut stream: EventStream) -> Result<EventStream> {
        let mut store = self.events.write().await;

        let persisted = Self::stream_events(&store, &stream.query)
            .last()
            .map(|e| e.revision)
            .unwrap_or(Revision::initial());
        let expected = stream.current_revision();

        // Check the stream was not written since it was loaded
        if persisted != expected {
            return Err(EventStoreError::ConcurrencyConflict {
                stream: stream.query.clone(),
                expected,
                actual: persisted,
            });
        }

        validate_events_for_append(&stream.query, expected, &stream.uncommitted)
            .map_err(|e| EventStoreError::InvalidAppend(e.message))?;

        let appended = std::mem::take(&mut stream.uncommitted);
        let mut undispatched = self.undispatched.write().await;
        undispatched.extend(appended.iter().map(|e| e.event_id));
        store.extend(appended.iter().cloned());

        tracing::debug!(revision = %appended.last().map(|e| e.revision).unwrap_or(expected), "stream committed");

        stream.events.extend(appended.iter().cloned());
        stream.events_to_dispatch = appended;
        Ok(stream)
    }

    async fn create_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.query().stream_key(), snapshot);
        Ok(())
    }

    async fn set_event_to_dispatched(&self, event_id: EventId) -> Result<()> {
        let store = self.events.read().await;
        let mut undispatched = self.undispatched.write().await;
        match undispatched.iter().position(|id| *id == event_id) {
            Some(pos) => {
                undispatched.remove(pos);
                Ok(())
            }
            None if store.iter().any(|e| e.event_id == event_id) => Ok(()),
            None => Err(EventStoreError::EventNotFound(event_id)),
        }
    }

    async fn get_undispatched_events(&self) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let undispatched = self.undispatched.read().await;
        Ok(undispatched
            .iter()
            .filter_map(|id| store.iter().find(|e| e.event_id == *id).cloned())
            .collect())
    }

    async fn get_events(&self, query: &AggregateQuery) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        Ok(Self::stream_events(&store, query))
    }
}
