//! Command handler workflow.
//!
//! One [`CommandHandler`] exists per aggregate definition. It turns a command
//! into committed events through a fixed sequence of stages:
//!
//! 1. enqueue on the local per-aggregate queue and wait for its turn
//! 2. validate the payload
//! 3. check PreLoadConditions
//! 4. reserve the aggregate on the lock
//! 5. load the aggregate (scheduling a snapshot in the background if due)
//! 6. verify it is not destroyed and at the declared revision
//! 7. check PreConditions and run the command handler
//! 8. check BusinessRules, rolling the model back on failure
//! 9. verify this worker is the only one holding the aggregate
//! 10. commit and publish
//! 11. resolve the lock, whatever happened after step 4
//! 12. dequeue
//!
//! Everything after enqueueing runs on a spawned task. A caller dropping
//! the result never leaves a reservation or a queue entry behind.
//!
//! Any stage error is terminal for the command. Lock collisions fail fast
//! with [`DomainError::Concurrency`]; nothing is retried.

use std::sync::Arc;
use std::time::Instant;

use aggregate_lock::AggregateLock;
use common::AggregateId;
use event_store::{AggregateQuery, EventEnvelope, EventStore, Revision, Snapshot};
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::aggregate::{AggregateContext, AggregateModel};
use crate::command::Command;
use crate::definition::{AggregateDefinition, CommandDefinition, Existence};
use crate::error::{DomainError, Result};
use crate::publisher::EventDispatcher;
use crate::queue::{CommandQueue, QueuedCommand};
use crate::{rules, sourcing};

/// Outcome of a successfully handled command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The committed events, in revision order. Empty if the command
    /// produced none.
    pub events: Vec<EventEnvelope>,

    /// The aggregate attributes after the command.
    pub aggregate_data: Value,

    pub meta: CommandMeta,
}

/// Addressing information of the aggregate a command ran against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMeta {
    pub aggregate_id: AggregateId,
    pub aggregate: String,
    pub context: String,
    pub revision: Revision,
}

/// Runs the command workflow for one aggregate type.
pub struct CommandHandler<S, L>
where
    S: EventStore,
    L: AggregateLock,
{
    definition: Arc<AggregateDefinition>,
    store: S,
    lock: Arc<L>,
    dispatcher: Arc<EventDispatcher<S>>,
    queue: Arc<CommandQueue>,
    worker_id: String,
}

impl<S, L> Clone for CommandHandler<S, L>
where
    S: EventStore + Clone,
    L: AggregateLock,
{
    fn clone(&self) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            store: self.store.clone(),
            lock: Arc::clone(&self.lock),
            dispatcher: Arc::clone(&self.dispatcher),
            queue: Arc::clone(&self.queue),
            worker_id: self.worker_id.clone(),
        }
    }
}

impl<S, L> CommandHandler<S, L>
where
    S: EventStore + Clone + 'static,
    L: AggregateLock + 'static,
{
    /// Creates a handler.
    ///
    /// Handlers sharing a process should share `queue`, so that aggregates
    /// with the same id never run concurrently in one process.
    pub fn new(
        definition: Arc<AggregateDefinition>,
        store: S,
        lock: Arc<L>,
        dispatcher: Arc<EventDispatcher<S>>,
        queue: Arc<CommandQueue>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            definition,
            store,
            lock,
            dispatcher,
            queue,
            worker_id: worker_id.into(),
        }
    }

    pub fn definition(&self) -> &AggregateDefinition {
        &self.definition
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Handles one command. A command without aggregate id gets a new one
    /// from the event store.
    ///
    /// Once the command is enqueued its workflow runs on its own task, so
    /// dropping the returned future does not cancel it: the command still
    /// completes, the lock is resolved and the queue moves on.
    #[tracing::instrument(
        skip(self, command),
        fields(aggregate = %self.definition.name(), command = %command.name, command_id = %command.id)
    )]
    pub async fn handle(&self, mut command: Command) -> Result<CommandResult> {
        let started = Instant::now();
        let aggregate_id = match &command.aggregate_id {
            Some(id) => id.clone(),
            None => {
                let id = AggregateId::from(self.store.get_new_id().await?);
                command.aggregate_id = Some(id.clone());
                id
            }
        };

        // 1. Enqueue; the rest runs on its own task
        let slot = self
            .queue
            .queue_command(aggregate_id.clone(), command.id.clone());

        let handler = self.clone();
        let task = tokio::spawn(
            async move {
                let result = handler.handle_queued(slot, &command, &aggregate_id).await;
                handler.record_outcome(&result, started);
                result
            }
            .in_current_span(),
        );

        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(DomainError::Aborted(err.to_string())),
        }
    }

    async fn handle_queued(
        &self,
        mut slot: QueuedCommand,
        command: &Command,
        aggregate_id: &AggregateId,
    ) -> Result<CommandResult> {
        // Wait for every earlier command on this aggregate
        slot.turn().await;

        let result = self.run_workflow(command, aggregate_id).await;

        // 12. Dequeue, letting the next command for this aggregate start
        drop(slot);
        result
    }

    fn record_outcome(&self, result: &Result<CommandResult>, started: Instant) {
        let outcome = match result {
            Ok(handled) => {
                tracing::info!(
                    aggregate_id = %handled.meta.aggregate_id,
                    revision = %handled.meta.revision,
                    events = handled.events.len(),
                    "command handled"
                );
                "success"
            }
            Err(err) => {
                tracing::info!(error = %err, "command rejected");
                err.name()
            }
        };
        metrics::counter!(
            "domain_commands_total",
            "aggregate" => self.definition.name().to_string(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!(
            "domain_command_duration_seconds",
            "aggregate" => self.definition.name().to_string()
        )
        .record(started.elapsed().as_secs_f64());
    }

    async fn run_workflow(
        &self,
        command: &Command,
        aggregate_id: &AggregateId,
    ) -> Result<CommandResult> {
        let command_definition = self
            .definition
            .command(&command.name, command.version)
            .ok_or_else(|| DomainError::CommandHandlerNotFound {
                context: command.context.clone(),
                aggregate: Some(self.definition.name().to_string()),
                name: command.name.clone(),
                version: command.version,
            })?;

        // 2. Validate
        command_definition.validate(command)?;

        // 3. PreLoadConditions
        rules::check_pre_load_conditions(self.definition.pre_load_conditions(), command).await?;

        // 4. Lock
        self.lock.reserve(&self.worker_id, aggregate_id).await?;

        let result = self
            .run_locked(command_definition, command, aggregate_id)
            .await;

        // 11. Always release the aggregate
        if let Err(err) = self.lock.resolve(aggregate_id).await {
            tracing::warn!(%aggregate_id, error = %err, "failed to resolve aggregate lock");
        }

        result
    }

    async fn run_locked(
        &self,
        command_definition: &CommandDefinition,
        command: &Command,
        aggregate_id: &AggregateId,
    ) -> Result<CommandResult> {
        let query = self.definition.query_for(aggregate_id);

        // 5. Load
        let load_started = Instant::now();
        let (snapshot, mut stream) = self.store.get_from_snapshot(&query).await?;
        let mut model = self.definition.new_model(aggregate_id);
        let snapshot_needed = sourcing::load_from_history(
            &self.definition,
            &mut model,
            snapshot.as_ref(),
            &stream.events,
            load_started.elapsed(),
        )?;
        if snapshot_needed {
            self.schedule_snapshot(&query, &model);
        }

        // 6. Verify
        self.verify_aggregate(command_definition, command, &model)?;

        // 7. PreConditions and command handler
        let checkpoint = model.checkpoint();
        let handled = self
            .let_aggregate_handle(command_definition, command, &mut model)
            .await;
        if let Err(err) = handled {
            model.rollback(checkpoint);
            return Err(err);
        }

        // 8. BusinessRules
        let checked = rules::check_business_rules(
            self.definition.business_rules(),
            model.attributes(),
            checkpoint.attributes(),
            model.uncommitted_events(),
            command,
        )
        .await;
        if let Err(err) = checked {
            model.rollback(checkpoint);
            return Err(err);
        }

        // 9. Still the only worker on this aggregate?
        self.check_aggregate_lock(aggregate_id).await?;

        // 10. Commit and publish
        let uncommitted = model.take_uncommitted_events();
        let events = if uncommitted.is_empty() {
            Vec::new()
        } else {
            stream.add_events(uncommitted);
            let committed = self.store.commit(stream).await?;
            metrics::counter!(
                "domain_events_committed_total",
                "aggregate" => self.definition.name().to_string()
            )
            .increment(committed.events_to_dispatch.len() as u64);
            self.dispatcher.dispatch(&committed.events_to_dispatch).await;
            committed.events_to_dispatch
        };

        Ok(CommandResult {
            events,
            aggregate_data: model.to_json(),
            meta: CommandMeta {
                aggregate_id: aggregate_id.clone(),
                aggregate: self.definition.name().to_string(),
                context: self.definition.context().to_string(),
                revision: model.revision(),
            },
        })
    }

    fn verify_aggregate(
        &self,
        command_definition: &CommandDefinition,
        command: &Command,
        model: &AggregateModel,
    ) -> Result<()> {
        let revision = model.revision();

        if model.is_destroyed() {
            return Err(DomainError::AggregateDestroyed {
                aggregate_id: model.id().clone(),
                aggregate_revision: revision,
            });
        }

        if let Some(expected) = command.revision
            && expected != revision
        {
            return Err(DomainError::AggregateConcurrency {
                aggregate_id: model.id().clone(),
                aggregate_revision: revision,
                command_revision: expected,
            });
        }

        match command_definition.existence {
            Existence::Required if revision == Revision::initial() => {
                Err(DomainError::AggregateNotFound {
                    aggregate: self.definition.name().to_string(),
                    aggregate_id: model.id().clone(),
                })
            }
            Existence::New if revision > Revision::initial() => {
                Err(DomainError::AggregateAlreadyExists {
                    aggregate_id: model.id().clone(),
                    aggregate_revision: revision,
                })
            }
            _ => Ok(()),
        }
    }

    async fn let_aggregate_handle(
        &self,
        command_definition: &CommandDefinition,
        command: &Command,
        model: &mut AggregateModel,
    ) -> Result<()> {
        rules::check_pre_conditions(self.definition.pre_conditions(), command, model.attributes())
            .await?;

        let mut context = AggregateContext::new(model, &self.definition, command);
        command_definition.handle(command, &mut context)
    }

    async fn check_aggregate_lock(&self, aggregate_id: &AggregateId) -> Result<()> {
        let workers = self.lock.get_all(aggregate_id).await?;
        if workers == [self.worker_id.as_str()] {
            return Ok(());
        }

        metrics::counter!(
            "domain_lock_collisions_total",
            "aggregate" => self.definition.name().to_string()
        )
        .increment(1);
        tracing::warn!(%aggregate_id, ?workers, "aggregate reserved by another worker");

        Err(DomainError::Concurrency {
            aggregate_id: aggregate_id.clone(),
            reason: format!("aggregate reserved by workers {workers:?}"),
        })
    }

    /// Stores a snapshot of the freshly loaded model without blocking the
    /// command.
    fn schedule_snapshot(&self, query: &AggregateQuery, model: &AggregateModel) {
        let snapshot = Snapshot::new(
            query,
            self.definition.version(),
            model.revision(),
            model.to_json(),
        );
        let store = self.store.clone();
        let aggregate = self.definition.name().to_string();

        tokio::spawn(async move {
            let revision = snapshot.revision;
            match store.create_snapshot(snapshot).await {
                Ok(()) => {
                    tracing::debug!(%aggregate, %revision, "snapshot created");
                    metrics::counter!("domain_snapshots_created_total", "aggregate" => aggregate)
                        .increment(1);
                }
                Err(err) => tracing::warn!(%aggregate, error = %err, "failed to create snapshot"),
            }
        });
    }
}
