//! Event store contract for the domain engine.
//!
//! The command handler workflow only talks to storage through the
//! [`EventStore`] trait: it loads a snapshot plus the newer part of an
//! aggregate's stream, appends the uncommitted events, creates snapshots in
//! the background and marks published events as dispatched.

pub mod error;
pub mod event;
pub mod memory;
pub mod query;
pub mod snapshot;
pub mod store;
pub mod stream;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Revision};
pub use memory::InMemoryEventStore;
pub use query::AggregateQuery;
pub use snapshot::Snapshot;
pub use store::{EventStore, EventStoreExt};
pub use stream::EventStream;
