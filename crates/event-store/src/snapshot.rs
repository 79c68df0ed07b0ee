//! Aggregate snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, AggregateQuery, Revision};

/// A snapshot of an aggregate's attributes at a specific revision.
///
/// Snapshots are used to optimize aggregate reconstruction by providing
/// a starting point, avoiding the need to replay all events from the beginning.
/// `version` is the aggregate definition version the data was captured with;
/// older snapshots are migrated when loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,

    /// The aggregate name (e.g., "cart").
    pub aggregate: String,

    /// The bounded context of the aggregate.
    pub context: String,

    /// Definition version the data shape corresponds to.
    pub version: u32,

    /// The aggregate revision at the time of the snapshot.
    pub revision: Revision,

    /// When the snapshot was created.
    pub timestamp: DateTime<Utc>,

    /// The serialized aggregate attributes.
    pub data: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot for the stream addressed by `query`.
    pub fn new(
        query: &AggregateQuery,
        version: u32,
        revision: Revision,
        data: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id: query.aggregate_id.clone(),
            aggregate: query.aggregate.clone(),
            context: query.context.clone(),
            version,
            revision,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Returns the query addressing this snapshot's stream.
    pub fn query(&self) -> AggregateQuery {
        AggregateQuery::new(
            self.context.clone(),
            self.aggregate.clone(),
            self.aggregate_id.clone(),
        )
    }

    /// Deserializes the snapshot data into a concrete type.
    pub fn into_data<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct CartState {
        items: Vec<String>,
    }

    #[test]
    fn snapshot_new() {
        let query = AggregateQuery::new("sale", "cart", AggregateId::from("cart-1"));
        let data = serde_json::json!({"items": ["apple"]});

        let snapshot = Snapshot::new(&query, 3, Revision::new(5), data.clone());

        assert_eq!(snapshot.aggregate_id.as_str(), "cart-1");
        assert_eq!(snapshot.aggregate, "cart");
        assert_eq!(snapshot.context, "sale");
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.revision, Revision::new(5));
        assert_eq!(snapshot.data, data);
        assert_eq!(snapshot.query(), query);
    }

    #[test]
    fn snapshot_into_data() {
        let query = AggregateQuery::new("sale", "cart", AggregateId::from("cart-1"));
        let snapshot = Snapshot::new(
            &query,
            1,
            Revision::new(2),
            serde_json::json!({"items": ["apple", "pear"]}),
        );

        let state: CartState = snapshot.into_data().unwrap();
        assert_eq!(state.items, vec!["apple", "pear"]);
    }
}
