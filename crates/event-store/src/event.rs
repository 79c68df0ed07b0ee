//! Event identity, revisions and the event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Revision of an aggregate: the number of events applied to it.
///
/// A fresh aggregate is at revision 0; every committed event increments the
/// revision by exactly one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// Creates a revision from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the revision of an aggregate without history (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the revision carried by the first event (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next revision.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw revision value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Revision> for u64 {
    fn from(revision: Revision) -> Self {
        revision.0
    }
}

/// A committed or about-to-be-committed domain event.
///
/// The envelope is fully addressed: it names the context, aggregate and
/// aggregate instance it belongs to and the command that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The event name (e.g., "itemAdded").
    pub name: String,

    /// Schema version of the event payload.
    pub version: u32,

    /// The aggregate instance this event belongs to.
    pub aggregate_id: AggregateId,

    /// The aggregate name (e.g., "cart").
    pub aggregate: String,

    /// The bounded context the aggregate lives in.
    pub context: String,

    /// Id of the command that produced this event.
    pub correlation_id: String,

    /// The aggregate revision after this event.
    pub revision: Revision,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// The event payload.
    pub payload: serde_json::Value,

    /// Metadata inherited from the command.
    pub meta: serde_json::Value,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    name: Option<String>,
    version: u32,
    aggregate_id: Option<AggregateId>,
    aggregate: Option<String>,
    context: Option<String>,
    correlation_id: Option<String>,
    revision: Option<Revision>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    meta: Option<serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the payload schema version. Defaults to 0.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Sets the aggregate name.
    pub fn aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    /// Sets the context name.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the id of the command that caused the event.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the revision.
    pub fn revision(mut self, revision: Revision) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the metadata. Defaults to an empty object.
    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if required fields (name, aggregate_id, aggregate, context, revision)
    /// are not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            name: self.name.expect("name is required"),
            version: self.version,
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            aggregate: self.aggregate.expect("aggregate is required"),
            context: self.context.expect("context is required"),
            correlation_id: self.correlation_id.unwrap_or_default(),
            revision: self.revision.expect("revision is required"),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
            meta: self.meta.unwrap_or_else(|| serde_json::json!({})),
        }
    }

    /// Tries to build the event envelope, returning None if required fields are missing.
    pub fn try_build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            name: self.name?,
            version: self.version,
            aggregate_id: self.aggregate_id?,
            aggregate: self.aggregate?,
            context: self.context?,
            correlation_id: self.correlation_id.unwrap_or_default(),
            revision: self.revision?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
            meta: self.meta.unwrap_or_else(|| serde_json::json!({})),
        })
    }
}
