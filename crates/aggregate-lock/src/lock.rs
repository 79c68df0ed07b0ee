//! The aggregate lock contract.

use async_trait::async_trait;

use crate::{AggregateId, Result};

/// Contract for aggregate lock backends.
///
/// The command handler workflow uses the lock as an optimistic
/// claim-and-verify scheme rather than a mutex:
///
/// 1. before loading an aggregate it calls [`reserve`](Self::reserve);
/// 2. right before committing it calls [`get_all`](Self::get_all) and aborts
///    unless the result is exactly its own worker id;
/// 3. whatever the outcome it calls [`resolve`](Self::resolve).
///
/// Reserve-then-check is not atomic at the backend, so a backend without
/// read-after-write consistency can miss a collision for a short window.
/// Collision detection is therefore best effort. Closing the window requires a
/// backend-native atomic conditional write.
#[async_trait]
pub trait AggregateLock: Send + Sync {
    /// Opens the connection to the backend.
    async fn connect(&self) -> Result<()>;

    /// Closes the connection to the backend.
    async fn disconnect(&self) -> Result<()>;

    /// Returns a new unique id, used as worker id.
    async fn get_new_id(&self) -> Result<String>;

    /// Records that `worker_id` is acting on `aggregate_id`.
    async fn reserve(&self, worker_id: &str, aggregate_id: &AggregateId) -> Result<()>;

    /// Returns the workers holding a reservation on `aggregate_id`, ordered by
    /// reservation time ascending.
    async fn get_all(&self, aggregate_id: &AggregateId) -> Result<Vec<String>>;

    /// Removes every reservation on `aggregate_id`.
    async fn resolve(&self, aggregate_id: &AggregateId) -> Result<()>;

    /// Removes every reservation in the store. Meant for tests and debugging.
    async fn clear(&self) -> Result<()>;
}
