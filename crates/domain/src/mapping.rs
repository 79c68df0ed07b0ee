//! Wire envelope mapping.
//!
//! Commands and events travel as arbitrary JSON envelopes. A
//! [`DefinitionMapping`] names, for every logical field, the dotted path it
//! lives at, so the envelope shape can change without code changes.

use common::{AggregateId, path};
use event_store::{EventEnvelope, Revision};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{DomainError, Result};

/// Logical field to dotted path mapping.
///
/// An empty path leaves the field unmapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefinitionMapping {
    pub id: String,
    pub name: String,
    pub aggregate_id: String,
    pub context: String,
    pub aggregate: String,
    pub payload: String,
    pub revision: String,
    pub version: String,
    pub meta: String,
    pub correlation_id: String,
}

impl Default for DefinitionMapping {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            name: "name".to_string(),
            aggregate_id: "aggregate.id".to_string(),
            context: "context.name".to_string(),
            aggregate: "aggregate.name".to_string(),
            payload: "payload".to_string(),
            revision: "revision".to_string(),
            version: "version".to_string(),
            meta: "meta".to_string(),
            correlation_id: "correlationId".to_string(),
        }
    }
}

/// Routing information extracted from a command envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInformation {
    pub name: String,
    pub aggregate_id: Option<AggregateId>,
    pub context: String,
    pub aggregate: Option<String>,
    pub version: u32,
}

impl DefinitionMapping {
    /// Resolves name, aggregate id, context, aggregate and version.
    ///
    /// Version defaults to 0 and context to `default_context`. A missing name
    /// or a version that is not a `u32` is a validation error.
    pub fn target_information(
        &self,
        envelope: &Value,
        default_context: &str,
    ) -> Result<TargetInformation> {
        let name = self.string_at(envelope, &self.name).ok_or_else(|| {
            DomainError::validation(format!("command envelope has no name at '{}'", self.name))
        })?;

        Ok(TargetInformation {
            name,
            aggregate_id: self
                .string_at(envelope, &self.aggregate_id)
                .map(AggregateId::from),
            context: self
                .string_at(envelope, &self.context)
                .unwrap_or_else(|| default_context.to_string()),
            aggregate: self.string_at(envelope, &self.aggregate),
            version: self.version_at(envelope)?.unwrap_or(0),
        })
    }

    /// Renders a committed event in the configured wire shape.
    pub fn event_to_value(&self, event: &EventEnvelope) -> Value {
        let mut out = json!({});
        self.put(&mut out, &self.id, json!(event.event_id.to_string()));
        self.put(&mut out, &self.name, json!(event.name));
        self.put(&mut out, &self.aggregate_id, json!(event.aggregate_id));
        self.put(&mut out, &self.context, json!(event.context));
        self.put(&mut out, &self.aggregate, json!(event.aggregate));
        self.put(&mut out, &self.correlation_id, json!(event.correlation_id));
        self.put(&mut out, &self.revision, json!(event.revision));
        self.put(&mut out, &self.version, json!(event.version));
        self.put(&mut out, &self.payload, event.payload.clone());
        self.put(&mut out, &self.meta, event.meta.clone());
        out
    }

    /// Returns the value at `field_path`, unless unmapped, missing or null.
    pub fn value_at<'a>(&self, envelope: &'a Value, field_path: &str) -> Option<&'a Value> {
        if field_path.is_empty() {
            return None;
        }
        path::get_present(envelope, field_path)
    }

    /// Reads a string field. Numbers are accepted and rendered as strings.
    pub fn string_at(&self, envelope: &Value, field_path: &str) -> Option<String> {
        match self.value_at(envelope, field_path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Reads an unsigned integer field. Numeric strings are accepted.
    ///
    /// A missing or null field is `None`. Anything else that is not a
    /// non-negative integer is a validation error.
    pub fn u64_at(&self, envelope: &Value, field_path: &str) -> Result<Option<u64>> {
        let Some(value) = self.value_at(envelope, field_path) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| invalid_integer(field_path, value))
    }

    /// Reads the declared revision of a command envelope.
    pub fn revision_at(&self, envelope: &Value) -> Result<Option<Revision>> {
        Ok(self.u64_at(envelope, &self.revision)?.map(Revision::new))
    }

    /// Reads the command or event version of an envelope.
    pub fn version_at(&self, envelope: &Value) -> Result<Option<u32>> {
        match self.u64_at(envelope, &self.version)? {
            None => Ok(None),
            Some(version) => u32::try_from(version).map(Some).map_err(|_| {
                invalid_integer(&self.version, &json!(version))
            }),
        }
    }

    /// Writes `value` at `field_path` unless the field is unmapped.
    pub fn put(&self, out: &mut Value, field_path: &str, value: Value) {
        if !field_path.is_empty() {
            path::set(out, field_path, value);
        }
    }
}

fn invalid_integer(field_path: &str, value: &Value) -> DomainError {
    DomainError::Validation {
        message: format!("'{field_path}' must be a non-negative integer, got {value}"),
        more: Some(json!({ "field": field_path, "value": value })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_information_with_defaults() {
        let mapping = DefinitionMapping::default();
        let envelope = json!({
            "name": "addItem",
            "aggregate": {"id": "X", "name": "cart"},
            "context": {"name": "sale"},
            "version": 2
        });

        let target = mapping.target_information(&envelope, "_general").unwrap();
        assert_eq!(target.name, "addItem");
        assert_eq!(target.aggregate_id, Some(AggregateId::from("X")));
        assert_eq!(target.context, "sale");
        assert_eq!(target.aggregate.as_deref(), Some("cart"));
        assert_eq!(target.version, 2);
    }

    #[test]
    fn target_information_falls_back_to_default_context_and_version() {
        let mapping = DefinitionMapping::default();
        let target = mapping
            .target_information(&json!({"name": "addItem"}), "_general")
            .unwrap();

        assert_eq!(target.context, "_general");
        assert_eq!(target.version, 0);
        assert!(target.aggregate_id.is_none());
        assert!(target.aggregate.is_none());
    }

    #[test]
    fn missing_name_is_a_validation_error() {
        let mapping = DefinitionMapping::default();
        let err = mapping
            .target_information(&json!({"payload": {}}), "_general")
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn malformed_integers_are_rejected() {
        let mapping = DefinitionMapping::default();

        for revision in [json!("stale"), json!(-1), json!(0.5), json!(true), json!({})] {
            let err = mapping
                .revision_at(&json!({ "revision": revision }))
                .unwrap_err();
            match err {
                DomainError::Validation { more, .. } => {
                    assert_eq!(more.unwrap()["value"], revision);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        let err = mapping
            .target_information(&json!({"name": "addItem", "version": u64::MAX}), "_general")
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn absent_and_numeric_string_integers() {
        let mapping = DefinitionMapping::default();
        assert_eq!(mapping.revision_at(&json!({})).unwrap(), None);
        assert_eq!(mapping.revision_at(&json!({"revision": null})).unwrap(), None);
        assert_eq!(
            mapping.revision_at(&json!({"revision": "3"})).unwrap(),
            Some(Revision::new(3))
        );
        assert_eq!(mapping.version_at(&json!({"version": 2})).unwrap(), Some(2));
    }

    #[test]
    fn custom_paths_and_numeric_ids() {
        let mapping = DefinitionMapping {
            name: "command".to_string(),
            aggregate_id: "target.key".to_string(),
            context: String::new(),
            ..Default::default()
        };
        let envelope = json!({"command": "ping", "target": {"key": 42}, "context": {"name": "ignored"}});

        let target = mapping.target_information(&envelope, "ops").unwrap();
        assert_eq!(target.name, "ping");
        assert_eq!(target.aggregate_id, Some(AggregateId::from("42")));
        assert_eq!(target.context, "ops");
    }

    #[test]
    fn mapping_deserializes_partial_overrides() {
        let mapping: DefinitionMapping =
            serde_json::from_value(json!({"aggregateId": "aggregateId"})).unwrap();
        assert_eq!(mapping.aggregate_id, "aggregateId");
        assert_eq!(mapping.name, "name");
        assert_eq!(mapping.correlation_id, "correlationId");
    }

    #[test]
    fn event_to_value_uses_mapped_paths() {
        let event = EventEnvelope::builder()
            .name("itemAdded")
            .version(1)
            .aggregate_id(AggregateId::from("X"))
            .aggregate("cart")
            .context("sale")
            .correlation_id("cmd-1")
            .revision(Revision::new(3))
            .payload_raw(json!({"item": "apple"}))
            .build();

        let value = DefinitionMapping::default().event_to_value(&event);
        assert_eq!(value["name"], "itemAdded");
        assert_eq!(value["aggregate"]["id"], "X");
        assert_eq!(value["aggregate"]["name"], "cart");
        assert_eq!(value["context"]["name"], "sale");
        assert_eq!(value["correlationId"], "cmd-1");
        assert_eq!(value["revision"], 3);
        assert_eq!(value["version"], 1);
        assert_eq!(value["payload"]["item"], "apple");
        assert_eq!(value["id"], event.event_id.to_string());
    }
}
