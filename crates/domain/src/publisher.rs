//! Publishing committed events downstream.

use std::sync::Arc;

use async_trait::async_trait;
use common::path;
use event_store::{EventEnvelope, EventStore};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};

use crate::error::PublishError;
use crate::mapping::DefinitionMapping;

/// Downstream sink for committed events and command rejections.
///
/// Delivery is at-least-once: an event may be published again after a crash
/// or publish failure, so consumers must handle duplicates.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: Value) -> Result<(), PublishError>;
}

/// Publisher that keeps every published value. Clones share the same log.
#[derive(Debug, Clone)]
pub struct InMemoryPublisher {
    published: Arc<RwLock<Vec<Value>>>,
    name_path: String,
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::with_mapping(&DefinitionMapping::default())
    }
}

impl InMemoryPublisher {
    /// Publisher for events in the default wire shape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher reading event names at the name path of `mapping`.
    pub fn with_mapping(mapping: &DefinitionMapping) -> Self {
        Self {
            published: Arc::default(),
            name_path: mapping.name.clone(),
        }
    }

    /// Everything published so far, in order.
    pub async fn published(&self) -> Vec<Value> {
        self.published.read().await.clone()
    }

    /// Published values whose name, read at the mapping's name path, equals
    /// `name`.
    pub async fn published_named(&self, name: &str) -> Vec<Value> {
        self.published
            .read()
            .await
            .iter()
            .filter(|v| path::get(v, &self.name_path).is_some_and(|n| n == name))
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, event: Value) -> Result<(), PublishError> {
        self.published.write().await.push(event);
        Ok(())
    }
}

/// Publisher forwarding values to a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<Value>,
}

impl ChannelPublisher {
    /// Creates the publisher and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, event: Value) -> Result<(), PublishError> {
        self.sender
            .send(event)
            .map_err(|_| PublishError("event channel closed".to_string()))
    }
}

/// Hands committed events to the publisher and records their delivery.
pub struct EventDispatcher<S> {
    store: S,
    publisher: Arc<dyn Publisher>,
    mapping: DefinitionMapping,
}

impl<S> EventDispatcher<S>
where
    S: EventStore,
{
    pub fn new(store: S, publisher: Arc<dyn Publisher>, mapping: DefinitionMapping) -> Self {
        Self {
            store,
            publisher,
            mapping,
        }
    }

    /// Publishes each event, then marks it dispatched in the store.
    ///
    /// Failures are logged and leave the event undispatched. Returns the
    /// number of events marked dispatched.
    pub async fn dispatch(&self, events: &[EventEnvelope]) -> usize {
        let mut dispatched = 0;
        for event in events {
            if let Err(err) = self.publisher.publish(self.mapping.event_to_value(event)).await {
                tracing::warn!(event_id = %event.event_id, event = %event.name, error = %err, "failed to publish event");
                continue;
            }
            match self.store.set_event_to_dispatched(event.event_id).await {
                Ok(()) => dispatched += 1,
                Err(err) => {
                    tracing::warn!(event_id = %event.event_id, error = %err, "failed to mark event dispatched")
                }
            }
        }
        dispatched
    }

    /// Publishes a value that is not a stored event.
    pub async fn publish(&self, value: Value) -> Result<(), PublishError> {
        self.publisher.publish(value).await
    }

    pub fn mapping(&self) -> &DefinitionMapping {
        &self.mapping
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use event_store::{InMemoryEventStore, Revision};

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _: Value) -> Result<(), PublishError> {
            Err(PublishError("broker down".to_string()))
        }
    }

    async fn committed_events(store: &InMemoryEventStore) -> Vec<EventEnvelope> {
        let query = event_store::AggregateQuery::new("sale", "cart", "X");
        let (_, mut stream) = store.get_from_snapshot(&query).await.unwrap();
        for revision in 1..=2 {
            stream.add_event(
                EventEnvelope::builder()
                    .name("itemAdded")
                    .aggregate_id(AggregateId::from("X"))
                    .aggregate("cart")
                    .context("sale")
                    .revision(Revision::new(revision))
                    .build(),
            );
        }
        store.commit(stream).await.unwrap().events_to_dispatch
    }

    #[tokio::test]
    async fn dispatch_publishes_and_marks_events() {
        let store = InMemoryEventStore::new();
        let publisher = InMemoryPublisher::new();
        let dispatcher = EventDispatcher::new(
            store.clone(),
            Arc::new(publisher.clone()),
            DefinitionMapping::default(),
        );

        let events = committed_events(&store).await;
        assert_eq!(dispatcher.dispatch(&events).await, 2);

        let published = publisher.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0]["revision"], 1);
        assert_eq!(published[1]["aggregate"]["id"], "X");
        assert!(store.get_undispatched_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_publish_leaves_events_undispatched() {
        let store = InMemoryEventStore::new();
        let dispatcher = EventDispatcher::new(
            store.clone(),
            Arc::new(FailingPublisher),
            DefinitionMapping::default(),
        );

        let events = committed_events(&store).await;
        assert_eq!(dispatcher.dispatch(&events).await, 0);
        assert_eq!(store.get_undispatched_events().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn published_named_follows_the_event_mapping() {
        let store = InMemoryEventStore::new();
        let mapping = DefinitionMapping {
            name: "type.name".to_string(),
            ..Default::default()
        };
        let publisher = InMemoryPublisher::with_mapping(&mapping);
        let dispatcher = EventDispatcher::new(store.clone(), Arc::new(publisher.clone()), mapping);

        let events = committed_events(&store).await;
        dispatcher.dispatch(&events).await;

        assert_eq!(publisher.published_named("itemAdded").await.len(), 2);
        assert!(publisher.published_named("other").await.is_empty());
        assert!(
            InMemoryPublisher::new()
                .published_named("itemAdded")
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn channel_publisher_forwards_values() {
        let (publisher, mut receiver) = ChannelPublisher::new();
        publisher
            .publish(serde_json::json!({"name": "itemAdded"}))
            .await
            .unwrap();
        assert_eq!(receiver.recv().await.unwrap()["name"], "itemAdded");

        drop(receiver);
        assert!(publisher.publish(Value::Null).await.is_err());
    }
}
