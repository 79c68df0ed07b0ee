//! Static aggregate definitions: commands, events, rules and snapshot policy.
//!
//! Definitions are assembled once with [`AggregateDefinition::builder`] and
//! are immutable afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use event_store::{AggregateQuery, EventEnvelope};
use serde_json::{Value, json};

use crate::aggregate::{AggregateContext, AggregateModel};
use crate::command::{Command, Validator};
use crate::error::Result;
use crate::rules::{BusinessRule, PreCondition, PreLoadCondition, sort_by_priority};

/// Mutates a model for one event. Event handlers cannot fail.
pub type EventHandlerFn = Arc<dyn Fn(&EventEnvelope, &mut AggregateModel) + Send + Sync>;

/// Decides which events a command produces.
pub type CommandHandlerFn =
    Arc<dyn Fn(&Command, &mut AggregateContext<'_>) -> Result<()> + Send + Sync>;

/// Migrates snapshot data from one definition version onwards.
pub type SnapshotConversionFn = Arc<dyn Fn(&Value, &mut AggregateModel) + Send + Sync>;

/// Handler for one event name, optionally restricted to one version.
#[derive(Clone)]
pub struct EventDefinition {
    pub name: String,
    pub version: Option<u32>,
    handler: EventHandlerFn,
}

impl EventDefinition {
    /// Creates an unversioned handler, used for every version of the event
    /// that has no versioned handler.
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&EventEnvelope, &mut AggregateModel) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version: None,
            handler: Arc::new(handler),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn apply(&self, event: &EventEnvelope, model: &mut AggregateModel) {
        (self.handler)(event, model)
    }
}

impl fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Whether a command requires the aggregate to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Existence {
    #[default]
    Any,
    /// Fails with `AggregateNotFound` at revision 0.
    Required,
    /// Fails with `AggregateAlreadyExists` past revision 0.
    New,
}

/// A command an aggregate accepts.
#[derive(Clone)]
pub struct CommandDefinition {
    pub name: String,
    pub version: u32,
    pub existence: Existence,
    validator: Option<Arc<dyn Validator>>,
    handler: CommandHandlerFn,
}

impl CommandDefinition {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Command, &mut AggregateContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version: 0,
            existence: Existence::Any,
            validator: None,
            handler: Arc::new(handler),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Only accept the command for aggregates with history.
    pub fn existing_only(mut self) -> Self {
        self.existence = Existence::Required;
        self
    }

    /// Only accept the command for aggregates without history.
    pub fn new_only(mut self) -> Self {
        self.existence = Existence::New;
        self
    }

    /// Runs the payload validator, if any.
    pub fn validate(&self, command: &Command) -> Result<()> {
        match &self.validator {
            Some(validator) => validator.validate(&command.payload),
            None => Ok(()),
        }
    }

    pub fn handle(&self, command: &Command, context: &mut AggregateContext<'_>) -> Result<()> {
        (self.handler)(command, context)
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("existence", &self.existence)
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Decides, after a load, whether a new snapshot should be taken.
///
/// Any `Fn(Duration, &[EventEnvelope], &AggregateModel) -> bool` closure is a
/// predicate.
pub trait SnapshotNeed: Send + Sync {
    fn is_snapshot_needed(
        &self,
        load_time: Duration,
        events: &[EventEnvelope],
        model: &AggregateModel,
    ) -> bool;
}

impl<F> SnapshotNeed for F
where
    F: Fn(Duration, &[EventEnvelope], &AggregateModel) -> bool + Send + Sync,
{
    fn is_snapshot_needed(
        &self,
        load_time: Duration,
        events: &[EventEnvelope],
        model: &AggregateModel,
    ) -> bool {
        self(load_time, events, model)
    }
}

/// Snapshot once at least this many events were replayed after the last
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCountThreshold(pub usize);

impl Default for EventCountThreshold {
    fn default() -> Self {
        Self(100)
    }
}

impl SnapshotNeed for EventCountThreshold {
    fn is_snapshot_needed(&self, _: Duration, events: &[EventEnvelope], _: &AggregateModel) -> bool {
        events.len() >= self.0
    }
}

/// Everything the engine knows about one aggregate type.
pub struct AggregateDefinition {
    name: String,
    context: String,
    version: u32,
    defaults: Value,
    commands: Vec<CommandDefinition>,
    events: Vec<EventDefinition>,
    pre_load_conditions: Vec<PreLoadCondition>,
    pre_conditions: Vec<PreCondition>,
    business_rules: Vec<BusinessRule>,
    snapshot_conversions: BTreeMap<u32, SnapshotConversionFn>,
    snapshot_need: Arc<dyn SnapshotNeed>,
}

impl AggregateDefinition {
    pub fn builder(
        context: impl Into<String>,
        name: impl Into<String>,
    ) -> AggregateDefinitionBuilder {
        AggregateDefinitionBuilder::new(context, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Current definition version; snapshots of older versions are migrated.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    pub fn commands(&self) -> &[CommandDefinition] {
        &self.commands
    }

    pub fn pre_load_conditions(&self) -> &[PreLoadCondition] {
        &self.pre_load_conditions
    }

    pub fn pre_conditions(&self) -> &[PreCondition] {
        &self.pre_conditions
    }

    pub fn business_rules(&self) -> &[BusinessRule] {
        &self.business_rules
    }

    pub fn snapshot_conversions(&self) -> &BTreeMap<u32, SnapshotConversionFn> {
        &self.snapshot_conversions
    }

    pub fn snapshot_need(&self) -> &dyn SnapshotNeed {
        self.snapshot_need.as_ref()
    }

    /// Stream query for one instance of this aggregate.
    pub fn query_for(&self, aggregate_id: &AggregateId) -> AggregateQuery {
        AggregateQuery::new(self.context.clone(), self.name.clone(), aggregate_id.clone())
    }

    /// A fresh model holding the default attributes.
    pub fn new_model(&self, aggregate_id: &AggregateId) -> AggregateModel {
        AggregateModel::new(&self.query_for(aggregate_id), &self.defaults)
    }

    /// Looks up a command by name and version.
    pub fn command(&self, name: &str, version: u32) -> Option<&CommandDefinition> {
        self.commands
            .iter()
            .find(|c| c.name == name && c.version == version)
    }

    pub fn handles_command(&self, name: &str, version: u32) -> bool {
        self.command(name, version).is_some()
    }

    /// Handler for `(name, version)`, falling back to the unversioned one.
    pub fn event_handler(&self, name: &str, version: u32) -> Option<&EventDefinition> {
        self.events
            .iter()
            .find(|e| e.name == name && e.version == Some(version))
            .or_else(|| {
                self.events
                    .iter()
                    .find(|e| e.name == name && e.version.is_none())
            })
    }
}

impl fmt::Debug for AggregateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateDefinition")
            .field("context", &self.context)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("commands", &self.commands)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AggregateDefinition`].
pub struct AggregateDefinitionBuilder {
    definition: AggregateDefinition,
}

impl AggregateDefinitionBuilder {
    fn new(context: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            definition: AggregateDefinition {
                name: name.into(),
                context: context.into(),
                version: 0,
                defaults: json!({}),
                commands: Vec::new(),
                events: Vec::new(),
                pre_load_conditions: Vec::new(),
                pre_conditions: Vec::new(),
                business_rules: Vec::new(),
                snapshot_conversions: BTreeMap::new(),
                snapshot_need: Arc::new(EventCountThreshold::default()),
            },
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.definition.version = version;
        self
    }

    /// Initial attributes of every new instance.
    pub fn defaults(mut self, defaults: Value) -> Self {
        self.definition.defaults = defaults;
        self
    }

    pub fn command(mut self, command: CommandDefinition) -> Self {
        self.definition.commands.push(command);
        self
    }

    pub fn event(mut self, event: EventDefinition) -> Self {
        self.definition.events.push(event);
        self
    }

    pub fn pre_load_condition(mut self, rule: PreLoadCondition) -> Self {
        self.definition.pre_load_conditions.push(rule);
        self
    }

    pub fn pre_condition(mut self, rule: PreCondition) -> Self {
        self.definition.pre_conditions.push(rule);
        self
    }

    pub fn business_rule(mut self, rule: BusinessRule) -> Self {
        self.definition.business_rules.push(rule);
        self
    }

    /// Registers the migration for snapshots taken at `from_version`.
    pub fn snapshot_conversion<F>(mut self, from_version: u32, conversion: F) -> Self
    where
        F: Fn(&Value, &mut AggregateModel) + Send + Sync + 'static,
    {
        self.definition
            .snapshot_conversions
            .insert(from_version, Arc::new(conversion));
        self
    }

    /// Replaces the default snapshot predicate.
    pub fn snapshot_need(mut self, need: impl SnapshotNeed + 'static) -> Self {
        self.definition.snapshot_need = Arc::new(need);
        self
    }

    /// Shorthand for an [`EventCountThreshold`] predicate.
    pub fn snapshot_threshold(self, events: usize) -> Self {
        self.snapshot_need(EventCountThreshold(events))
    }

    /// Finishes the definition, ordering every rule list by priority.
    pub fn build(mut self) -> AggregateDefinition {
        sort_by_priority(&mut self.definition.pre_load_conditions);
        sort_by_priority(&mut self.definition.pre_conditions);
        sort_by_priority(&mut self.definition.business_rules);
        self.definition
    }
}
