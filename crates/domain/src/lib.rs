//! Command handling for event-sourced aggregates.
//!
//! This crate turns incoming commands into committed events:
//! - [`AggregateDefinition`] describes an aggregate's commands, events, rules
//!   and snapshot policy
//! - [`CommandHandler`] runs the per-command workflow (queue, validate, lock,
//!   load, handle, check, commit, publish)
//! - [`CommandDispatcher`] routes wire envelopes to the right handler
//! - [`Domain`] wires everything to an event store, an aggregate lock and a
//!   publisher, and publishes `commandRejected` events for failed commands
//!
//! Within one process, commands against the same aggregate never interleave.
//! Across processes, concurrent activity on one aggregate is detected through
//! the aggregate lock and fails fast with [`DomainError::Concurrency`].

pub mod aggregate;
pub mod command;
pub mod config;
pub mod definition;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod handler;
pub mod mapping;
pub mod publisher;
pub mod queue;
pub mod rules;
pub mod sourcing;
pub mod telemetry;

pub use aggregate::{AggregateContext, AggregateModel, Checkpoint, DESTROYED_ATTRIBUTE};
pub use command::{Command, DEFAULT_CONTEXT, RequiredFields, Validator};
pub use config::{DomainConfig, LogFormat};
pub use definition::{
    AggregateDefinition, AggregateDefinitionBuilder, CommandDefinition, EventCountThreshold,
    EventDefinition, Existence, SnapshotNeed,
};
pub use dispatcher::CommandDispatcher;
pub use domain::{COMMAND_REJECTED, Domain, DomainBuilder};
pub use error::{DomainError, PublishError, Result};
pub use handler::{CommandHandler, CommandMeta, CommandResult};
pub use mapping::{DefinitionMapping, TargetInformation};
pub use publisher::{ChannelPublisher, EventDispatcher, InMemoryPublisher, Publisher};
pub use queue::{CommandQueue, QueuedCommand};
pub use rules::{
    BusinessRule, BusinessRuleCheck, PreCondition, PreConditionCheck, PreLoadCheck,
    PreLoadCondition, Rule, RuleRejection, RuleResult,
};
pub use telemetry::init_tracing;
