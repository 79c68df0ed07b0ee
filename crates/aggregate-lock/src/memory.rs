//! In-memory aggregate lock for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{AggregateId, AggregateLock, LockError, Reservation, Result};

/// In-memory aggregate lock.
///
/// Clones share the same reservations, so several handles behave like
/// several workers talking to one backend. Starts disconnected.
#[derive(Clone, Default)]
pub struct InMemoryAggregateLock {
    reservations: Arc<RwLock<HashMap<AggregateId, Vec<Reservation>>>>,
    connected: Arc<AtomicBool>,
}

impl InMemoryAggregateLock {
    /// Creates a new, disconnected lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true between `connect` and `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(LockError::NotConnected)
        }
    }
}

#[async_trait]
impl AggregateLock for InMemoryAggregateLock {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("aggregate lock connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        tracing::debug!("aggregate lock disconnected");
        Ok(())
    }

    async fn get_new_id(&self) -> Result<String> {
        self.ensure_connected()?;
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn reserve(&self, worker_id: &str, aggregate_id: &AggregateId) -> Result<()> {
        self.ensure_connected()?;
        let mut reservations = self.reservations.write().await;
        reservations
            .entry(aggregate_id.clone())
            .or_default()
            .push(Reservation::new(worker_id, aggregate_id.clone()));
        Ok(())
    }

    async fn get_all(&self, aggregate_id: &AggregateId) -> Result<Vec<String>> {
        self.ensure_connected()?;
        let reservations = self.reservations.read().await;
        let mut entries = reservations.get(aggregate_id).cloned().unwrap_or_default();
        // stable: equal timestamps keep reservation order
        entries.sort_by_key(|r| r.timestamp);
        Ok(entries.into_iter().map(|r| r.worker_id).collect())
    }

    async fn resolve(&self, aggregate_id: &AggregateId) -> Result<()> {
        self.ensure_connected()?;
        self.reservations.write().await.remove(aggregate_id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_connected()?;
        self.reservations.write().await.clear();
        Ok(())
    }
}
