//! In-memory [`QueueClient`] with receipt tracking.
//!
//! Received messages move to an unacknowledged set until deleted, the way a
//! hosted queue hides a message for its visibility timeout.
//! [`requeue_unacknowledged`](MemoryQueue::requeue_unacknowledged) plays the
//! part of that timeout expiring.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::queue::{QueueClient, QueueMessage};

#[derive(Default)]
struct State {
    pending: VecDeque<QueueMessage>,
    unacknowledged: Vec<QueueMessage>,
    deleted: Vec<String>,
}

/// Queue held entirely in process memory.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    next_receipt: AtomicU64,
    closed: AtomicBool,
    failures: AtomicUsize,
    notify: Notify,
}

impl MemoryQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message body and returns its receipt.
    pub fn push(&self, body: impl Into<String>) -> String {
        let receipt = format!("r-{}", self.next_receipt.fetch_add(1, Ordering::Relaxed));
        self.state.lock().pending.push_back(QueueMessage {
            body: body.into(),
            receipt: receipt.clone(),
        });
        self.notify.notify_waiters();
        receipt
    }

    /// Marks the queue exhausted once its pending messages are received.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Makes the next `count` receive calls fail.
    pub fn fail_next_receives(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Moves every received-but-undeleted message back to the front of the
    /// queue.
    pub fn requeue_unacknowledged(&self) {
        let mut state = self.state.lock();
        let returned = std::mem::take(&mut state.unacknowledged);
        for message in returned.into_iter().rev() {
            state.pending.push_front(message);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Messages waiting to be received.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Messages received but not yet deleted.
    #[must_use]
    pub fn unacknowledged(&self) -> usize {
        self.state.lock().unacknowledged.len()
    }

    /// Receipts deleted so far, in deletion order.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn receive(&self, max_messages: usize) -> anyhow::Result<Option<Vec<QueueMessage>>> {
        if self.take_failure() {
            anyhow::bail!("injected receive failure");
        }

        loop {
            // Registered before the check so a push in between is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if !state.pending.is_empty() {
                    let take = max_messages.min(state.pending.len());
                    let batch: Vec<QueueMessage> = state.pending.drain(..take).collect();
                    state.unacknowledged.extend(batch.iter().cloned());
                    return Ok(Some(batch));
                }
                if self.closed.load(Ordering::SeqCst) {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    async fn delete(&self, receipt: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let Some(position) = state
            .unacknowledged
            .iter()
            .position(|m| m.receipt == receipt)
        else {
            anyhow::bail!("unknown receipt: {receipt}");
        };
        state.unacknowledged.remove(position);
        state.deleted.push(receipt.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn receive_respects_batch_size() {
        let queue = MemoryQueue::new();
        for i in 0..5 {
            queue.push(format!("m{i}"));
        }

        let first = queue.receive(3).await.unwrap().unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].body, "m0");
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.unacknowledged(), 3);
    }

    #[tokio::test]
    async fn delete_acknowledges_once() {
        let queue = MemoryQueue::new();
        let receipt = queue.push("body");
        queue.receive(1).await.unwrap();

        queue.delete(&receipt).await.unwrap();
        assert!(queue.delete(&receipt).await.is_err());
        assert_eq!(queue.deleted(), vec![receipt]);
    }

    #[tokio::test]
    async fn closed_and_empty_reports_exhausted() {
        let queue = MemoryQueue::new();
        queue.push("last");
        queue.close();

        assert_eq!(queue.receive(10).await.unwrap().unwrap().len(), 1);
        assert!(queue.receive(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_waits_for_push() {
        let queue = Arc::new(MemoryQueue::new());
        let receiver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive(1).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push("late");

        let batch = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .expect("push should wake the receiver")
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test]
    async fn injected_failures_then_recovery() {
        let queue = MemoryQueue::new();
        queue.push("m");
        queue.fail_next_receives(2);

        assert!(queue.receive(1).await.is_err());
        assert!(queue.receive(1).await.is_err());
        assert!(queue.receive(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn requeue_restores_original_order() {
        let queue = MemoryQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c");
        queue.receive(2).await.unwrap();

        queue.requeue_unacknowledged();
        let bodies: Vec<String> = queue
            .receive(3)
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }
}
