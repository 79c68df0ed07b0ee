//! Aggregate lock: a pluggable reservation store used to detect when more
//! than one worker acts on the same aggregate at the same time.

pub mod error;
pub mod lock;
pub mod memory;
pub mod reservation;

pub use common::AggregateId;
pub use error::{LockError, Result};
pub use lock::AggregateLock;
pub use memory::InMemoryAggregateLock;
pub use reservation::Reservation;
