//! A worker's claim on an aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AggregateId;

/// A worker's claim on an aggregate.
///
/// Several reservations may exist for one aggregate at the same time; only
/// how many there are and which workers hold them matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub worker_id: String,
    pub aggregate_id: AggregateId,
    pub timestamp: DateTime<Utc>,
}

impl Reservation {
    /// Creates a reservation stamped with the current time.
    pub fn new(worker_id: impl Into<String>, aggregate_id: AggregateId) -> Self {
        Self {
            worker_id: worker_id.into(),
            aggregate_id,
            timestamp: Utc::now(),
        }
    }
}
