//! Event-sourcing engine: replay, snapshot migration and snapshot policy.

use std::time::Duration;

use event_store::{EventEnvelope, Snapshot};

use crate::aggregate::AggregateModel;
use crate::definition::AggregateDefinition;
use crate::error::{DomainError, Result};

/// Applies `events` in order, routing each to the handler for its
/// `(name, version)` or, failing that, its unversioned handler.
///
/// The model revision follows each applied event.
pub fn apply_events(
    definition: &AggregateDefinition,
    events: &[EventEnvelope],
    model: &mut AggregateModel,
) -> Result<()> {
    for event in events {
        let handler = definition
            .event_handler(&event.name, event.version)
            .ok_or_else(|| DomainError::EventHandlerNotFound {
                aggregate: definition.name().to_string(),
                name: event.name.clone(),
                version: event.version,
            })?;
        handler.apply(event, model);
        model.set_revision(event.revision);
    }
    Ok(())
}

/// Rebuilds `model` from an optional snapshot plus the events after it.
///
/// Returns whether a new snapshot should be taken, as decided by the
/// definition's snapshot predicate.
pub fn load_from_history(
    definition: &AggregateDefinition,
    model: &mut AggregateModel,
    snapshot: Option<&Snapshot>,
    events: &[EventEnvelope],
    load_time: Duration,
) -> Result<bool> {
    if let Some(snapshot) = snapshot {
        restore_snapshot(definition, model, snapshot)?;
        model.set_revision(snapshot.revision);
    }

    apply_events(definition, events, model)?;

    Ok(definition
        .snapshot_need()
        .is_snapshot_needed(load_time, events, model))
}

/// Sets the model attributes from snapshot data, migrating older versions.
///
/// A conversion registered for version `v` receives data of shape `v`. The
/// conversions for every version from the snapshot's up to (excluding) the
/// current one run in ascending order; each sees the model as left by the
/// previous one. The snapshot's own version must have a conversion.
fn restore_snapshot(
    definition: &AggregateDefinition,
    model: &mut AggregateModel,
    snapshot: &Snapshot,
) -> Result<()> {
    let current = definition.version();
    let missing = || DomainError::SnapshotConversionMissing {
        aggregate: definition.name().to_string(),
        from: snapshot.version,
        to: current,
    };

    if snapshot.version == current {
        model.set_attributes(snapshot.data.clone());
        return Ok(());
    }
    if snapshot.version > current {
        return Err(missing());
    }

    let mut chain = definition
        .snapshot_conversions()
        .range(snapshot.version..current)
        .peekable();
    if chain.peek().map(|(from, _)| **from) != Some(snapshot.version) {
        return Err(missing());
    }

    let mut data = snapshot.data.clone();
    for (from, conversion) in chain {
        tracing::debug!(
            aggregate = %definition.name(),
            from,
            to = current,
            "converting snapshot"
        );
        conversion(&data, model);
        data = model.to_json();
    }
    Ok(())
}
