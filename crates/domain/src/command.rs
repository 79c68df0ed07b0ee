//! Commands and command payload validation.

use common::{AggregateId, path};
use event_store::Revision;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{DomainError, Result};
use crate::mapping::{DefinitionMapping, TargetInformation};

/// Context used when a command envelope names none.
pub const DEFAULT_CONTEXT: &str = "_general";

/// An intention to change one aggregate.
///
/// Commands may be rejected; the events they produce are the facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique command id, copied to every event as correlation id.
    pub id: String,

    /// Command name (e.g. "addItem").
    pub name: String,

    /// Target aggregate instance. Generated when absent.
    pub aggregate_id: Option<AggregateId>,

    /// Target aggregate name, needed only when several aggregates of the
    /// context handle the same command.
    pub aggregate: Option<String>,

    /// Bounded context.
    pub context: String,

    pub payload: Value,

    /// Revision the sender expects the aggregate to be at.
    pub revision: Option<Revision>,

    pub version: u32,

    /// Metadata copied to every resulting event.
    pub meta: Value,
}

impl Command {
    /// Creates a command in the default context with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            aggregate_id: None,
            aggregate: None,
            context: DEFAULT_CONTEXT.to_string(),
            payload: json!({}),
            revision: None,
            version: 0,
            meta: json!({}),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<AggregateId>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn with_aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = Some(aggregate.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_revision(mut self, revision: impl Into<Revision>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Parses a wire envelope using `mapping`.
    ///
    /// A command without id gets a generated one; payload and meta default to
    /// empty objects. A revision or version that is present but not a
    /// non-negative integer is a validation error.
    pub fn from_envelope(
        envelope: &Value,
        mapping: &DefinitionMapping,
        default_context: &str,
    ) -> Result<Self> {
        let target = mapping.target_information(envelope, default_context)?;

        Ok(Self {
            id: mapping
                .string_at(envelope, &mapping.id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: target.name,
            aggregate_id: target.aggregate_id,
            aggregate: target.aggregate,
            context: target.context,
            payload: mapping
                .value_at(envelope, &mapping.payload)
                .cloned()
                .unwrap_or_else(|| json!({})),
            revision: mapping.revision_at(envelope)?,
            version: target.version,
            meta: mapping
                .value_at(envelope, &mapping.meta)
                .cloned()
                .unwrap_or_else(|| json!({})),
        })
    }

    /// Renders the command back into the wire shape of `mapping`.
    pub fn to_envelope(&self, mapping: &DefinitionMapping) -> Value {
        let mut out = json!({});
        mapping.put(&mut out, &mapping.id, json!(self.id));
        mapping.put(&mut out, &mapping.name, json!(self.name));
        if let Some(aggregate_id) = &self.aggregate_id {
            mapping.put(&mut out, &mapping.aggregate_id, json!(aggregate_id));
        }
        if let Some(aggregate) = &self.aggregate {
            mapping.put(&mut out, &mapping.aggregate, json!(aggregate));
        }
        mapping.put(&mut out, &mapping.context, json!(self.context));
        if let Some(revision) = self.revision {
            mapping.put(&mut out, &mapping.revision, json!(revision));
        }
        mapping.put(&mut out, &mapping.version, json!(self.version));
        mapping.put(&mut out, &mapping.payload, self.payload.clone());
        mapping.put(&mut out, &mapping.meta, self.meta.clone());
        out
    }

    /// Routing information of this command.
    pub fn target(&self) -> TargetInformation {
        TargetInformation {
            name: self.name.clone(),
            aggregate_id: self.aggregate_id.clone(),
            context: self.context.clone(),
            aggregate: self.aggregate.clone(),
            version: self.version,
        }
    }
}

/// Validates a command payload.
///
/// Any `Fn(&Value) -> Result<()>` closure is a validator.
pub trait Validator: Send + Sync {
    fn validate(&self, payload: &Value) -> Result<()>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<()> + Send + Sync,
{
    fn validate(&self, payload: &Value) -> Result<()> {
        self(payload)
    }
}

/// Requires every listed dotted path to be present and non-null.
#[derive(Debug, Clone, Default)]
pub struct RequiredFields(pub Vec<String>);

impl RequiredFields {
    pub fn new<I, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }
}

impl Validator for RequiredFields {
    fn validate(&self, payload: &Value) -> Result<()> {
        let missing: Vec<&str> = self
            .0
            .iter()
            .filter(|field| path::get_present(payload, field).is_none())
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        Err(DomainError::Validation {
            message: format!("missing required fields: {}", missing.join(", ")),
            more: Some(json!({ "missing": missing })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_command_has_defaults() {
        let command = Command::new("addItem");
        assert!(!command.id.is_empty());
        assert_eq!(command.context, DEFAULT_CONTEXT);
        assert_eq!(command.version, 0);
        assert!(command.revision.is_none());
        assert_eq!(command.meta, json!({}));
    }

    #[test]
    fn from_envelope_reads_every_field() {
        let envelope = json!({
            "id": "cmd-1",
            "name": "addItem",
            "aggregate": {"id": "X", "name": "cart"},
            "context": {"name": "sale"},
            "payload": {"item": "apple"},
            "revision": 3,
            "version": 1,
            "meta": {"user": "bob"}
        });

        let command =
            Command::from_envelope(&envelope, &DefinitionMapping::default(), DEFAULT_CONTEXT)
                .unwrap();
        assert_eq!(command.id, "cmd-1");
        assert_eq!(command.name, "addItem");
        assert_eq!(command.aggregate_id, Some(AggregateId::from("X")));
        assert_eq!(command.aggregate.as_deref(), Some("cart"));
        assert_eq!(command.context, "sale");
        assert_eq!(command.payload["item"], "apple");
        assert_eq!(command.revision, Some(Revision::new(3)));
        assert_eq!(command.version, 1);
        assert_eq!(command.meta["user"], "bob");
    }

    #[test]
    fn from_envelope_generates_missing_id() {
        let command = Command::from_envelope(
            &json!({"name": "addItem"}),
            &DefinitionMapping::default(),
            DEFAULT_CONTEXT,
        )
        .unwrap();
        assert!(!command.id.is_empty());
        assert_eq!(command.payload, json!({}));
    }

    #[test]
    fn to_envelope_parses_back() {
        let mapping = DefinitionMapping::default();
        let command = Command::new("addItem")
            .with_aggregate_id("X")
            .with_context("sale")
            .with_revision(2u64)
            .with_payload(json!({"item": "pear"}));

        let parsed =
            Command::from_envelope(&command.to_envelope(&mapping), &mapping, DEFAULT_CONTEXT)
                .unwrap();
        assert_eq!(parsed, command);
    }

    #[test]
    fn required_fields_lists_missing_paths() {
        let validator = RequiredFields::new(["item", "price.amount"]);
        assert!(
            validator
                .validate(&json!({"item": "apple", "price": {"amount": 3}}))
                .is_ok()
        );

        match validator.validate(&json!({"item": null})) {
            Err(DomainError::Validation { more, .. }) => {
                assert_eq!(more, Some(json!({"missing": ["item", "price.amount"]})));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn closures_are_validators() {
        let validator = |payload: &Value| {
            if payload["quantity"].as_u64().unwrap_or(0) > 0 {
                Ok(())
            } else {
                Err(DomainError::validation("quantity must be positive"))
            }
        };
        assert!(validator.validate(&json!({"quantity": 2})).is_ok());
        assert!(validator.validate(&json!({"quantity": 0})).is_err());
    }
}
