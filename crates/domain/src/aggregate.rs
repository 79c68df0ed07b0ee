//! Aggregate instance state and the context command handlers act through.

use std::collections::HashMap;

use common::{AggregateId, path};
use event_store::{AggregateQuery, EventEnvelope, Revision};
use serde_json::{Map, Value};

use crate::command::Command;
use crate::definition::AggregateDefinition;
use crate::error::Result;
use crate::sourcing;

/// Attribute holding the destroyed flag.
pub const DESTROYED_ATTRIBUTE: &str = "_destroyed";

/// In-memory state of one aggregate instance.
///
/// A model is owned by exactly one workflow execution at a time. Revisions
/// are tracked per stream key (`context.aggregate.aggregateId`) since one
/// store may host several aggregate types sharing an id space.
#[derive(Debug, Clone)]
pub struct AggregateModel {
    id: AggregateId,
    revision_key: String,
    attributes: Value,
    revisions: HashMap<String, Revision>,
    uncommitted_events: Vec<EventEnvelope>,
}

/// Attributes and revisions captured before a command mutates the model.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    attributes: Value,
    revisions: HashMap<String, Revision>,
}

impl Checkpoint {
    /// The attributes as they were when the checkpoint was taken.
    pub fn attributes(&self) -> &Value {
        &self.attributes
    }
}

impl AggregateModel {
    /// Creates a model at revision 0 holding `defaults` plus its id.
    pub fn new(query: &AggregateQuery, defaults: &Value) -> Self {
        let mut model = Self {
            id: query.aggregate_id.clone(),
            revision_key: query.stream_key(),
            attributes: Value::Object(Map::new()),
            revisions: HashMap::new(),
            uncommitted_events: Vec::new(),
        };
        model.set_attributes(defaults.clone());
        model
    }

    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Returns the attribute at a dotted path.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        path::get(&self.attributes, attribute)
    }

    /// Sets the attribute at a dotted path.
    pub fn set(&mut self, attribute: &str, value: Value) {
        path::set(&mut self.attributes, attribute, value);
    }

    /// Replaces every attribute. The `id` attribute always stays the model id.
    pub fn set_attributes(&mut self, attributes: Value) {
        self.attributes = match attributes {
            Value::Object(map) => Value::Object(map),
            _ => Value::Object(Map::new()),
        };
        self.set("id", Value::String(self.id.to_string()));
    }

    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    /// Serialized attributes, as returned to callers and stored in snapshots.
    pub fn to_json(&self) -> Value {
        self.attributes.clone()
    }

    /// Marks the aggregate destroyed. Called from event handlers.
    pub fn destroy(&mut self) {
        self.set(DESTROYED_ATTRIBUTE, Value::Bool(true));
    }

    pub fn is_destroyed(&self) -> bool {
        self.get(DESTROYED_ATTRIBUTE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Revision of this aggregate's own stream.
    pub fn revision(&self) -> Revision {
        self.revisions
            .get(&self.revision_key)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_revision(&mut self, revision: Revision) {
        self.revisions.insert(self.revision_key.clone(), revision);
    }

    /// Revision recorded for another stream sharing this model.
    pub fn revision_of(&self, query: &AggregateQuery) -> Revision {
        self.revisions
            .get(&query.stream_key())
            .copied()
            .unwrap_or_default()
    }

    pub fn set_revision_of(&mut self, query: &AggregateQuery, revision: Revision) {
        self.revisions.insert(query.stream_key(), revision);
    }

    pub fn uncommitted_events(&self) -> &[EventEnvelope] {
        &self.uncommitted_events
    }

    pub fn add_uncommitted_event(&mut self, event: EventEnvelope) {
        self.uncommitted_events.push(event);
    }

    /// Removes and returns the uncommitted events.
    pub fn take_uncommitted_events(&mut self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.uncommitted_events)
    }

    pub fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            attributes: self.attributes.clone(),
            revisions: self.revisions.clone(),
        }
    }

    /// Restores a checkpoint and discards the uncommitted events.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.attributes = checkpoint.attributes;
        self.revisions = checkpoint.revisions;
        self.uncommitted_events.clear();
    }
}

/// What a command handler sees of the aggregate it runs against.
///
/// State only changes through [`apply`](Self::apply), which records an event
/// and runs its handler right away.
pub struct AggregateContext<'a> {
    model: &'a mut AggregateModel,
    definition: &'a AggregateDefinition,
    command: &'a Command,
}

impl<'a> AggregateContext<'a> {
    pub fn new(
        model: &'a mut AggregateModel,
        definition: &'a AggregateDefinition,
        command: &'a Command,
    ) -> Self {
        Self {
            model,
            definition,
            command,
        }
    }

    pub fn id(&self) -> &AggregateId {
        self.model.id()
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.model.get(attribute)
    }

    pub fn attributes(&self) -> &Value {
        self.model.attributes()
    }

    pub fn revision(&self) -> Revision {
        self.model.revision()
    }

    pub fn is_destroyed(&self) -> bool {
        self.model.is_destroyed()
    }

    pub fn command(&self) -> &Command {
        self.command
    }

    /// Records event `name` (version 0) and applies it to the model.
    pub fn apply(&mut self, name: impl Into<String>, payload: Value) -> Result<()> {
        self.apply_versioned(name, payload, 0)
    }

    /// Records a versioned event and applies it to the model.
    ///
    /// The event carries the next revision, the command id as correlation id
    /// and the command meta.
    pub fn apply_versioned(
        &mut self,
        name: impl Into<String>,
        payload: Value,
        version: u32,
    ) -> Result<()> {
        let event = EventEnvelope::builder()
            .name(name)
            .version(version)
            .aggregate_id(self.model.id().clone())
            .aggregate(self.definition.name())
            .context(self.definition.context())
            .correlation_id(self.command.id.clone())
            .revision(self.model.revision().next())
            .payload_raw(payload)
            .meta(self.command.meta.clone())
            .build();

        sourcing::apply_events(self.definition, std::slice::from_ref(&event), self.model)?;
        self.model.add_uncommitted_event(event);
        Ok(())
    }
}
