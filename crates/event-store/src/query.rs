//! Stream addressing.

use serde::{Deserialize, Serialize};

use crate::AggregateId;

/// Addresses one aggregate instance's event stream.
///
/// One physical store may host several aggregate types sharing an id space,
/// so a stream is identified by context, aggregate name and aggregate id
/// together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateQuery {
    /// The bounded context.
    pub context: String,

    /// The aggregate name.
    pub aggregate: String,

    /// The aggregate instance id.
    pub aggregate_id: AggregateId,
}

impl AggregateQuery {
    /// Creates a query for the given stream.
    pub fn new(
        context: impl Into<String>,
        aggregate: impl Into<String>,
        aggregate_id: impl Into<AggregateId>,
    ) -> Self {
        Self {
            context: context.into(),
            aggregate: aggregate.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    /// Returns the namespace key `context.aggregate.aggregateId`.
    ///
    /// Used both as the stream key in stores and as the revision key on the
    /// aggregate model.
    pub fn stream_key(&self) -> String {
        format!("{}.{}.{}", self.context, self.aggregate, self.aggregate_id)
    }
}

impl std::fmt::Display for AggregateQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stream_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_joins_context_aggregate_and_id() {
        let query = AggregateQuery::new("sale", "cart", "X");
        assert_eq!(query.stream_key(), "sale.cart.X");
        assert_eq!(query.to_string(), "sale.cart.X");
    }

    #[test]
    fn same_id_in_different_aggregates_are_different_streams() {
        let cart = AggregateQuery::new("sale", "cart", "X");
        let order = AggregateQuery::new("sale", "order", "X");
        assert_ne!(cart.stream_key(), order.stream_key());
    }
}
