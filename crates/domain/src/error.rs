//! Domain error types.

use aggregate_lock::LockError;
use common::AggregateId;
use event_store::{EventStoreError, Revision};
use serde_json::{Value, json};
use thiserror::Error;

/// Errors that can occur while handling a command.
///
/// Every workflow stage error is terminal for the command and reaches the
/// caller unchanged.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The command (or its payload) does not match what the command accepts.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        more: Option<Value>,
    },

    /// A PreLoadCondition, PreCondition or BusinessRule rejected the command.
    #[error("Business rule violated: {message}")]
    BusinessRule {
        message: String,
        rule: Option<String>,
        more: Option<Value>,
    },

    /// The aggregate was destroyed by an earlier command.
    #[error("Aggregate {aggregate_id} is destroyed (revision {aggregate_revision})")]
    AggregateDestroyed {
        aggregate_id: AggregateId,
        aggregate_revision: Revision,
    },

    /// The command declared a revision the aggregate is not at.
    #[error(
        "Aggregate {aggregate_id} is at revision {aggregate_revision}, command expected {command_revision}"
    )]
    AggregateConcurrency {
        aggregate_id: AggregateId,
        aggregate_revision: Revision,
        command_revision: Revision,
    },

    /// Another worker acted on the same aggregate concurrently.
    #[error("Concurrency error on aggregate {aggregate_id}: {reason}")]
    Concurrency {
        aggregate_id: AggregateId,
        reason: String,
    },

    /// No registered aggregate handles the command.
    #[error(
        "No command handler found for {context}/{target}/{name} (version {version})",
        target = .aggregate.as_deref().unwrap_or("*")
    )]
    CommandHandlerNotFound {
        context: String,
        aggregate: Option<String>,
        name: String,
        version: u32,
    },

    /// Several aggregates handle the command and the envelope does not say which.
    #[error("Command {name} (version {version}) is handled by several aggregates: {candidates:?}")]
    AmbiguousCommand {
        name: String,
        version: u32,
        candidates: Vec<String>,
    },

    /// The command only works on an aggregate that already has history.
    #[error("Aggregate not found: {aggregate} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate: String,
        aggregate_id: AggregateId,
    },

    /// The command only works on an aggregate without history.
    #[error("Aggregate {aggregate_id} already exists (revision {aggregate_revision})")]
    AggregateAlreadyExists {
        aggregate_id: AggregateId,
        aggregate_revision: Revision,
    },

    /// An event has no handler on its aggregate definition.
    #[error("No event handler found for {aggregate}/{name} (version {version})")]
    EventHandlerNotFound {
        aggregate: String,
        name: String,
        version: u32,
    },

    /// A snapshot cannot be migrated to the current definition version.
    #[error("No snapshot conversion for {aggregate} from version {from} to {to}")]
    SnapshotConversionMissing { aggregate: String, from: u32, to: u32 },

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    /// An error occurred in the aggregate lock backend.
    #[error("Aggregate lock error: {0}")]
    Lock(#[from] LockError),

    /// The task running the command was cancelled before it finished, e.g.
    /// because the runtime shut down.
    #[error("Command aborted: {0}")]
    Aborted(String),
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict {
                stream,
                expected,
                actual,
            } => DomainError::Concurrency {
                aggregate_id: stream.aggregate_id,
                reason: format!("stream moved from revision {expected} to {actual}"),
            },
            other => DomainError::EventStore(other),
        }
    }
}

impl DomainError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        DomainError::Validation {
            message: message.into(),
            more: None,
        }
    }

    /// Creates a business rule error not tied to a registered rule.
    ///
    /// Command handlers use this to reject a command.
    pub fn business_rule(message: impl Into<String>) -> Self {
        DomainError::BusinessRule {
            message: message.into(),
            rule: None,
            more: None,
        }
    }

    /// Error name as exposed on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            DomainError::Validation { .. } => "ValidationError",
            DomainError::BusinessRule { .. } => "BusinessRuleError",
            DomainError::AggregateDestroyed { .. } => "AggregateDestroyedError",
            DomainError::AggregateConcurrency { .. } => "AggregateConcurrencyError",
            DomainError::Concurrency { .. } => "ConcurrencyError",
            DomainError::CommandHandlerNotFound { .. } | DomainError::AmbiguousCommand { .. } => {
                "CommandHandlerNotFoundError"
            }
            DomainError::AggregateNotFound { .. } => "AggregateNotFoundError",
            DomainError::AggregateAlreadyExists { .. } => "AggregateAlreadyExistsError",
            DomainError::EventHandlerNotFound { .. } => "EventHandlerNotFoundError",
            DomainError::SnapshotConversionMissing { .. } => "SnapshotConversionError",
            DomainError::EventStore(_) => "EventStoreError",
            DomainError::Lock(_) => "AggregateLockError",
            DomainError::Aborted(_) => "CommandAbortedError",
        }
    }

    /// Structured detail attached to the error, if any.
    pub fn more(&self) -> Value {
        match self {
            DomainError::Validation { more, .. } => more.clone().unwrap_or(Value::Null),
            DomainError::BusinessRule { rule, more, .. } => match (rule, more) {
                (None, None) => Value::Null,
                (rule, more) => json!({ "rule": rule, "more": more }),
            },
            DomainError::AggregateDestroyed {
                aggregate_id,
                aggregate_revision,
            } => json!({
                "aggregateId": aggregate_id,
                "aggregateRevision": aggregate_revision,
            }),
            DomainError::AggregateConcurrency {
                aggregate_id,
                aggregate_revision,
                command_revision,
            } => json!({
                "aggregateId": aggregate_id,
                "aggregateRevision": aggregate_revision,
                "commandRevision": command_revision,
            }),
            DomainError::Concurrency { aggregate_id, .. } => json!({ "aggregateId": aggregate_id }),
            _ => Value::Null,
        }
    }

    /// Revision of the aggregate the error refers to, when known.
    pub fn aggregate_revision(&self) -> Option<Revision> {
        match self {
            DomainError::AggregateDestroyed {
                aggregate_revision, ..
            }
            | DomainError::AggregateConcurrency {
                aggregate_revision, ..
            }
            | DomainError::AggregateAlreadyExists {
                aggregate_revision, ..
            } => Some(*aggregate_revision),
            _ => None,
        }
    }

    /// Serialized form used as the `reason` of `commandRejected` events.
    pub fn reason(&self) -> Value {
        json!({
            "name": self.name(),
            "message": self.to_string(),
            "more": self.more(),
        })
    }
}

/// Error returned by a [`Publisher`](crate::Publisher).
#[derive(Debug, Clone, Error)]
#[error("Publish failed: {0}")]
pub struct PublishError(pub String);

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::AggregateQuery;

    #[test]
    fn store_conflict_becomes_concurrency_error() {
        let err: DomainError = EventStoreError::ConcurrencyConflict {
            stream: AggregateQuery::new("sale", "cart", "X"),
            expected: Revision::new(1),
            actual: Revision::new(2),
        }
        .into();

        match err {
            DomainError::Concurrency { aggregate_id, .. } => assert_eq!(aggregate_id.as_str(), "X"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reason_carries_name_message_and_detail() {
        let err = DomainError::AggregateConcurrency {
            aggregate_id: AggregateId::from("X"),
            aggregate_revision: Revision::new(1),
            command_revision: Revision::new(0),
        };

        let reason = err.reason();
        assert_eq!(reason["name"], "AggregateConcurrencyError");
        assert_eq!(reason["more"]["aggregateRevision"], 1);
        assert_eq!(reason["more"]["commandRevision"], 0);
        assert!(reason["message"].as_str().unwrap().contains("revision 1"));
    }

    #[test]
    fn business_rule_detail_includes_rule_name() {
        let err = DomainError::BusinessRule {
            message: "too many items".to_string(),
            rule: Some("maxItems".to_string()),
            more: Some(json!({"max": 3})),
        };

        assert_eq!(err.name(), "BusinessRuleError");
        assert_eq!(err.more(), json!({"rule": "maxItems", "more": {"max": 3}}));
        assert_eq!(DomainError::business_rule("no").more(), Value::Null);
    }

    #[test]
    fn aggregate_revision_is_exposed_for_revision_errors() {
        let err = DomainError::AggregateDestroyed {
            aggregate_id: AggregateId::from("X"),
            aggregate_revision: Revision::new(4),
        };
        assert_eq!(err.aggregate_revision(), Some(Revision::new(4)));
        assert_eq!(DomainError::validation("bad").aggregate_revision(), None);
    }

    #[test]
    fn aborted_and_store_errors_have_wire_names() {
        let aborted = DomainError::Aborted("runtime shutting down".to_string());
        assert_eq!(aborted.name(), "CommandAbortedError");
        assert_eq!(aborted.reason()["message"], "Command aborted: runtime shutting down");
        assert_eq!(
            DomainError::from(EventStoreError::InvalidAppend("gap".to_string())).name(),
            "EventStoreError"
        );
    }
}
