//! The [`Domain`] facade: wiring, command entry point and rejection events.

use std::sync::Arc;

use aggregate_lock::AggregateLock;
use event_store::EventStore;
use serde_json::{Value, json};

use crate::command::Command;
use crate::config::DomainConfig;
use crate::definition::AggregateDefinition;
use crate::dispatcher::CommandDispatcher;
use crate::error::{DomainError, Result};
use crate::handler::{CommandHandler, CommandResult};
use crate::publisher::{EventDispatcher, Publisher};
use crate::queue::CommandQueue;

/// Name of the event published when a command fails.
pub const COMMAND_REJECTED: &str = "commandRejected";

/// A set of aggregates sharing an event store, an aggregate lock and a
/// publisher.
///
/// Every failed command is reported to the caller and also published as a
/// `commandRejected` event, so consumers observe rejections on the same
/// channel as domain events.
pub struct Domain<S, L>
where
    S: EventStore,
    L: AggregateLock,
{
    config: DomainConfig,
    store: S,
    lock: Arc<L>,
    dispatcher: CommandDispatcher<S, L>,
    events: Arc<EventDispatcher<S>>,
    worker_id: String,
}

impl<S, L> Domain<S, L>
where
    S: EventStore + Clone + 'static,
    L: AggregateLock + 'static,
{
    pub fn builder(store: S, lock: L, publisher: impl Publisher + 'static) -> DomainBuilder<S, L> {
        DomainBuilder {
            store,
            lock,
            publisher: Arc::new(publisher),
            config: DomainConfig::default(),
            definitions: Vec::new(),
        }
    }

    /// Handles a wire command envelope.
    #[tracing::instrument(skip(self, envelope), fields(worker_id = %self.worker_id))]
    pub async fn handle(&self, envelope: &Value) -> Result<CommandResult> {
        let result = self.dispatcher.dispatch(envelope).await;
        if let Err(err) = &result {
            self.publish_rejection(envelope, err).await;
        }
        result
    }

    /// Handles an already parsed command.
    pub async fn handle_command(&self, command: Command) -> Result<CommandResult> {
        let envelope = command.to_envelope(&self.config.command_mapping);
        let result = self.dispatcher.dispatch_command(command).await;
        if let Err(err) = &result {
            self.publish_rejection(&envelope, err).await;
        }
        result
    }

    /// Publishes every event the store still reports undispatched.
    ///
    /// Returns how many were published and marked dispatched.
    #[tracing::instrument(skip(self))]
    pub async fn republish_undispatched(&self) -> Result<usize> {
        let pending = self.store.get_undispatched_events().await?;
        let dispatched = self.events.dispatch(&pending).await;
        tracing::info!(pending = pending.len(), dispatched, "republished undispatched events");
        Ok(dispatched)
    }

    /// Disconnects the aggregate lock.
    pub async fn shutdown(&self) -> Result<()> {
        self.lock.disconnect().await?;
        tracing::info!(worker_id = %self.worker_id, "domain shut down");
        Ok(())
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, L> {
        &self.dispatcher
    }

    /// Builds the `commandRejected` event for a failed command envelope.
    ///
    /// It addresses the same aggregate as the command, carries the command
    /// id as correlation id and the aggregate revision known from the error
    /// (0 otherwise).
    pub fn rejection_event(&self, envelope: &Value, err: &DomainError) -> Value {
        let commands = &self.config.command_mapping;
        let events = &self.config.event_mapping;

        let mut event = json!({});
        events.put(&mut event, &events.id, json!(uuid::Uuid::new_v4().to_string()));
        events.put(&mut event, &events.name, json!(COMMAND_REJECTED));
        for (from, to) in [
            (&commands.aggregate_id, &events.aggregate_id),
            (&commands.aggregate, &events.aggregate),
            (&commands.id, &events.correlation_id),
        ] {
            if let Some(value) = commands.string_at(envelope, from) {
                events.put(&mut event, to, json!(value));
            }
        }
        let context = commands
            .string_at(envelope, &commands.context)
            .unwrap_or_else(|| self.config.default_context.clone());
        events.put(&mut event, &events.context, json!(context));
        events.put(
            &mut event,
            &events.revision,
            json!(err.aggregate_revision().unwrap_or_default()),
        );
        events.put(&mut event, &events.version, json!(0));
        events.put(
            &mut event,
            &events.payload,
            json!({ "command": envelope, "reason": err.reason() }),
        );
        events.put(
            &mut event,
            &events.meta,
            commands
                .value_at(envelope, &commands.meta)
                .cloned()
                .unwrap_or_else(|| json!({})),
        );
        event
    }

    async fn publish_rejection(&self, envelope: &Value, err: &DomainError) {
        let event = self.rejection_event(envelope, err);
        if let Err(publish_err) = self.events.publish(event).await {
            tracing::warn!(error = %publish_err, "failed to publish command rejection");
        }
    }
}

/// Builder for [`Domain`].
pub struct DomainBuilder<S, L> {
    store: S,
    lock: L,
    publisher: Arc<dyn Publisher>,
    config: DomainConfig,
    definitions: Vec<AggregateDefinition>,
}

impl<S, L> DomainBuilder<S, L>
where
    S: EventStore + Clone + 'static,
    L: AggregateLock + 'static,
{
    pub fn config(mut self, config: DomainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn aggregate(mut self, definition: AggregateDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Connects the lock, picks the worker id and registers every aggregate.
    pub async fn build(self) -> Result<Domain<S, L>> {
        self.lock.connect().await?;
        let worker_id = match self.config.worker_id.clone() {
            Some(worker_id) => worker_id,
            None => self.lock.get_new_id().await?,
        };

        let lock = Arc::new(self.lock);
        let events = Arc::new(EventDispatcher::new(
            self.store.clone(),
            self.publisher,
            self.config.event_mapping.clone(),
        ));
        let queue = Arc::new(CommandQueue::new());

        let mut dispatcher = CommandDispatcher::new(
            self.config.command_mapping.clone(),
            self.config.default_context.clone(),
        );
        let aggregates = self.definitions.len();
        for definition in self.definitions {
            dispatcher.register(Arc::new(CommandHandler::new(
                Arc::new(definition),
                self.store.clone(),
                Arc::clone(&lock),
                Arc::clone(&events),
                Arc::clone(&queue),
                worker_id.clone(),
            )));
        }

        tracing::info!(%worker_id, aggregates, "domain initialized");

        Ok(Domain {
            config: self.config,
            store: self.store,
            lock,
            dispatcher,
            events,
            worker_id,
        })
    }
}
