//! Local, per-aggregate FIFO command queue.
//!
//! Within one process, commands against the same aggregate id run their whole
//! workflow strictly one at a time, in submission order. Commands against
//! different ids are not ordered against each other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::AggregateId;
use tokio::sync::oneshot;

#[derive(Debug)]
struct Entry {
    command_id: String,
    ticket: u64,
    /// Signals the entry once it becomes the head. `None` for the head.
    waker: Option<oneshot::Sender<()>>,
}

/// Per-aggregate FIFO of in-flight commands.
#[derive(Debug, Default)]
pub struct CommandQueue {
    queues: Mutex<HashMap<AggregateId, VecDeque<Entry>>>,
    next_ticket: AtomicU64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<AggregateId, VecDeque<Entry>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a command to the queue of `aggregate_id`.
    ///
    /// The returned slot resolves [`QueuedCommand::turn`] once every earlier
    /// entry for the same id is gone, and leaves the queue when dropped.
    pub fn queue_command(
        self: &Arc<Self>,
        aggregate_id: AggregateId,
        command_id: impl Into<String>,
    ) -> QueuedCommand {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let command_id = command_id.into();

        let mut queues = self.queues();
        let queue = queues.entry(aggregate_id.clone()).or_default();
        let ready = if queue.is_empty() {
            queue.push_back(Entry {
                command_id,
                ticket,
                waker: None,
            });
            None
        } else {
            let (tx, rx) = oneshot::channel();
            queue.push_back(Entry {
                command_id,
                ticket,
                waker: Some(tx),
            });
            Some(rx)
        };

        QueuedCommand {
            queue: Arc::clone(self),
            aggregate_id,
            ticket,
            ready,
        }
    }

    /// Id of the command at the head of the queue for `aggregate_id`.
    pub fn get_next_command_in_queue(&self, aggregate_id: &AggregateId) -> Option<String> {
        self.queues()
            .get(aggregate_id)
            .and_then(|queue| queue.front())
            .map(|entry| entry.command_id.clone())
    }

    /// Number of queued commands (running one included) for `aggregate_id`.
    pub fn len(&self, aggregate_id: &AggregateId) -> usize {
        self.queues().get(aggregate_id).map_or(0, VecDeque::len)
    }

    /// Returns true if no command is queued for any aggregate.
    pub fn is_empty(&self) -> bool {
        self.queues().is_empty()
    }

    /// Removes an entry and, if it was the head, wakes the next one.
    pub fn remove_command_from_queue(&self, aggregate_id: &AggregateId, ticket: u64) {
        let mut queues = self.queues();
        let Some(queue) = queues.get_mut(aggregate_id) else {
            return;
        };

        let was_head = queue.front().is_some_and(|e| e.ticket == ticket);
        queue.retain(|e| e.ticket != ticket);

        if was_head
            && let Some(next) = queue.front_mut()
            && let Some(waker) = next.waker.take()
        {
            // the receiver may already be gone; its slot removes itself
            let _ = waker.send(());
        }

        if queue.is_empty() {
            queues.remove(aggregate_id);
        }
    }
}

/// A command's place in the queue. Dropping it dequeues the command.
#[derive(Debug)]
pub struct QueuedCommand {
    queue: Arc<CommandQueue>,
    aggregate_id: AggregateId,
    ticket: u64,
    ready: Option<oneshot::Receiver<()>>,
}

impl QueuedCommand {
    /// Waits until this command is at the head of its queue.
    ///
    /// Cancel safe: a dropped `turn` future can be awaited again.
    pub async fn turn(&mut self) {
        if let Some(ready) = self.ready.as_mut() {
            // a closed channel means the entry was removed; nothing to wait for
            let _ = ready.await;
            self.ready = None;
        }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }
}

impl Drop for QueuedCommand {
    fn drop(&mut self) {
        self.queue
            .remove_command_from_queue(&self.aggregate_id, self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_command_runs_immediately() {
        let queue = Arc::new(CommandQueue::new());
        let mut slot = queue.queue_command(AggregateId::from("X"), "cmd-1");
        slot.turn().await;

        assert_eq!(
            queue.get_next_command_in_queue(&AggregateId::from("X")).as_deref(),
            Some("cmd-1")
        );
        drop(slot);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn second_command_waits_for_the_first() {
        let queue = Arc::new(CommandQueue::new());
        let id = AggregateId::from("X");
        let mut first = queue.queue_command(id.clone(), "cmd-1");
        let mut second = queue.queue_command(id.clone(), "cmd-2");
        first.turn().await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), second.turn()).await;
        assert!(waiting.is_err(), "second command must wait");
        assert_eq!(queue.len(&id), 2);

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), second.turn())
            .await
            .expect("second command should run after the first");
        assert_eq!(queue.get_next_command_in_queue(&id).as_deref(), Some("cmd-2"));
    }

    #[tokio::test]
    async fn different_aggregates_do_not_wait() {
        let queue = Arc::new(CommandQueue::new());
        let _x = queue.queue_command(AggregateId::from("X"), "cmd-1");
        let mut y = queue.queue_command(AggregateId::from("Y"), "cmd-2");

        tokio::time::timeout(Duration::from_secs(1), y.turn())
            .await
            .expect("other aggregate should not be blocked");
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_block_the_queue() {
        let queue = Arc::new(CommandQueue::new());
        let id = AggregateId::from("X");
        let first = queue.queue_command(id.clone(), "cmd-1");
        let abandoned = queue.queue_command(id.clone(), "cmd-2");
        let mut third = queue.queue_command(id.clone(), "cmd-3");

        drop(abandoned);
        drop(first);

        tokio::time::timeout(Duration::from_secs(1), third.turn())
            .await
            .expect("third command should run");
        assert_eq!(queue.len(&id), 1);
    }
}
