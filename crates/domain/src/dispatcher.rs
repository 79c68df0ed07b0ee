//! Routes command envelopes to the handler of the aggregate that accepts them.

use std::sync::Arc;

use aggregate_lock::AggregateLock;
use event_store::EventStore;
use serde_json::Value;

use crate::command::Command;
use crate::error::{DomainError, Result};
use crate::handler::{CommandHandler, CommandResult};
use crate::mapping::{DefinitionMapping, TargetInformation};

/// Command router over the registered aggregate handlers.
pub struct CommandDispatcher<S, L>
where
    S: EventStore,
    L: AggregateLock,
{
    handlers: Vec<Arc<CommandHandler<S, L>>>,
    mapping: DefinitionMapping,
    default_context: String,
}

impl<S, L> CommandDispatcher<S, L>
where
    S: EventStore + Clone + 'static,
    L: AggregateLock + 'static,
{
    pub fn new(mapping: DefinitionMapping, default_context: impl Into<String>) -> Self {
        Self {
            handlers: Vec::new(),
            mapping,
            default_context: default_context.into(),
        }
    }

    pub fn register(&mut self, handler: Arc<CommandHandler<S, L>>) {
        tracing::debug!(
            context = %handler.definition().context(),
            aggregate = %handler.definition().name(),
            "registered aggregate"
        );
        self.handlers.push(handler);
    }

    pub fn handlers(&self) -> &[Arc<CommandHandler<S, L>>] {
        &self.handlers
    }

    /// Resolves where a command envelope is headed.
    pub fn get_target_information(&self, envelope: &Value) -> Result<TargetInformation> {
        self.mapping
            .target_information(envelope, &self.default_context)
    }

    /// Finds the single handler accepting `target`.
    ///
    /// The aggregate name only needs to be given when several aggregates of
    /// the context accept the same command name and version.
    pub fn find_handler(&self, target: &TargetInformation) -> Result<Arc<CommandHandler<S, L>>> {
        let candidates: Vec<_> = self
            .handlers
            .iter()
            .filter(|handler| {
                let definition = handler.definition();
                definition.context() == target.context
                    && target
                        .aggregate
                        .as_deref()
                        .is_none_or(|aggregate| aggregate == definition.name())
                    && definition.handles_command(&target.name, target.version)
            })
            .collect();

        match candidates.as_slice() {
            [] => Err(DomainError::CommandHandlerNotFound {
                context: target.context.clone(),
                aggregate: target.aggregate.clone(),
                name: target.name.clone(),
                version: target.version,
            }),
            [handler] => Ok(Arc::clone(handler)),
            several => Err(DomainError::AmbiguousCommand {
                name: target.name.clone(),
                version: target.version,
                candidates: several
                    .iter()
                    .map(|h| h.definition().name().to_string())
                    .collect(),
            }),
        }
    }

    /// Parses and dispatches a wire envelope.
    #[tracing::instrument(skip(self, envelope))]
    pub async fn dispatch(&self, envelope: &Value) -> Result<CommandResult> {
        let command = Command::from_envelope(envelope, &self.mapping, &self.default_context)?;
        self.dispatch_command(command).await
    }

    /// Dispatches an already parsed command. Nothing happens if no handler
    /// accepts it.
    pub async fn dispatch_command(&self, command: Command) -> Result<CommandResult> {
        let handler = self.find_handler(&command.target())?;
        handler.handle(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AggregateDefinition, CommandDefinition, EventDefinition};
    use crate::publisher::{EventDispatcher, InMemoryPublisher};
    use crate::queue::CommandQueue;
    use aggregate_lock::InMemoryAggregateLock;
    use event_store::InMemoryEventStore;
    use serde_json::json;

    fn definition(context: &str, name: &str) -> AggregateDefinition {
        AggregateDefinition::builder(context, name)
            .command(CommandDefinition::new("rename", |command, ctx| {
                ctx.apply("renamed", command.payload.clone())
            }))
            .event(EventDefinition::new("renamed", |event, model| {
                model.set("name", event.payload["name"].clone());
            }))
            .build()
    }

    async fn dispatcher(
        definitions: Vec<AggregateDefinition>,
    ) -> (
        CommandDispatcher<InMemoryEventStore, InMemoryAggregateLock>,
        InMemoryEventStore,
    ) {
        let store = InMemoryEventStore::new();
        let lock = Arc::new(InMemoryAggregateLock::new());
        lock.connect().await.unwrap();
        let events = Arc::new(EventDispatcher::new(
            store.clone(),
            Arc::new(InMemoryPublisher::new()),
            DefinitionMapping::default(),
        ));
        let queue = Arc::new(CommandQueue::new());

        let mut dispatcher = CommandDispatcher::new(DefinitionMapping::default(), "_general");
        for definition in definitions {
            dispatcher.register(Arc::new(CommandHandler::new(
                Arc::new(definition),
                store.clone(),
                Arc::clone(&lock),
                Arc::clone(&events),
                Arc::clone(&queue),
                "worker-1",
            )));
        }
        (dispatcher, store)
    }

    #[tokio::test]
    async fn dispatch_routes_by_context() {
        let (dispatcher, store) =
            dispatcher(vec![definition("sale", "cart"), definition("hr", "person")]).await;

        let result = dispatcher
            .dispatch(&json!({
                "name": "rename",
                "context": {"name": "hr"},
                "aggregate": {"id": "p-1"},
                "payload": {"name": "Ada"}
            }))
            .await
            .unwrap();

        assert_eq!(result.meta.aggregate, "person");
        assert_eq!(result.aggregate_data["name"], "Ada");
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_command_has_no_side_effects() {
        let (dispatcher, store) = dispatcher(vec![definition("sale", "cart")]).await;

        let err = dispatcher
            .dispatch(&json!({"name": "rename", "aggregate": {"id": "c-1"}}))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::CommandHandlerNotFound { .. }));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn same_command_in_two_aggregates_needs_a_name() {
        let (dispatcher, _) =
            dispatcher(vec![definition("sale", "cart"), definition("sale", "order")]).await;

        let target = dispatcher
            .get_target_information(&json!({"name": "rename", "context": {"name": "sale"}}))
            .unwrap();
        assert!(matches!(
            dispatcher.find_handler(&target),
            Err(DomainError::AmbiguousCommand { .. })
        ));

        let target = dispatcher
            .get_target_information(&json!({
                "name": "rename",
                "context": {"name": "sale"},
                "aggregate": {"name": "order"}
            }))
            .unwrap();
        let handler = dispatcher.find_handler(&target).unwrap();
        assert_eq!(handler.definition().name(), "order");
    }
}
