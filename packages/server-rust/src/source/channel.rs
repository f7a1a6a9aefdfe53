//! In-process command channel with multiple consumers.
//!
//! Wraps a bounded tokio mpsc channel. The receiver sits behind an async
//! mutex so any number of workers can pull from it; a worker only holds the
//! mutex while waiting to receive, never while applying a command.

use async_trait::async_trait;
use queuekv_core::Command;
use tokio::sync::{mpsc, watch, Mutex};

use super::CommandSource;
use crate::lifecycle::cancelled;

/// Creates a connected sender/source pair. `capacity` is clamped to 1.
#[must_use]
pub fn command_channel(capacity: usize) -> (CommandSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (closed, _) = watch::channel(false);
    (
        CommandSender { tx },
        ChannelSource {
            rx: Mutex::new(rx),
            closed,
        },
    )
}

/// Sending half. Clone it freely; the source closes once every clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

impl CommandSender {
    /// Waits for buffer space and enqueues `command`.
    ///
    /// # Errors
    ///
    /// Returns the command back if the source has been closed.
    pub async fn send(&self, command: Command) -> Result<(), Command> {
        self.tx.send(command).await.map_err(|err| err.0)
    }

    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, consumed by workers through [`CommandSource`].
#[derive(Debug)]
pub struct ChannelSource {
    rx: Mutex<mpsc::Receiver<Command>>,
    closed: watch::Sender<bool>,
}

impl ChannelSource {
    /// Refuses further sends. Commands already buffered are still handed
    /// out before [`next`](CommandSource::next) returns `None`.
    pub fn close(&self) {
        // Stored even with no consumer subscribed; `next` reads it on entry.
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl CommandSource for ChannelSource {
    async fn next(&self) -> Option<Command> {
        let mut closed = self.closed.subscribe();
        let mut rx = self.rx.lock().await;

        if !*closed.borrow() {
            tokio::select! {
                biased;
                command = rx.recv() => return command,
                () = cancelled(&mut closed) => {}
            }
        }

        rx.close();
        rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn delivers_in_send_order_then_ends() {
        let (tx, source) = command_channel(8);
        tx.send(Command::add("a", "1")).await.unwrap();
        tx.send(Command::delete("a")).await.unwrap();
        drop(tx);

        assert_eq!(source.next().await.unwrap().key, "a");
        assert_eq!(
            source.next().await.unwrap().kind,
            queuekv_core::CommandType::Delete
        );
        assert!(source.next().await.is_none());
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn close_drains_buffer_and_rejects_sends() {
        let (tx, source) = command_channel(8);
        tx.send(Command::get("a")).await.unwrap();
        tx.send(Command::get("b")).await.unwrap();

        source.close();

        assert_eq!(source.next().await.unwrap().key, "a");
        assert!(tx.is_closed());
        assert!(tx.send(Command::get("c")).await.is_err());
        assert_eq!(source.next().await.unwrap().key, "b");
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn close_before_first_next_ends_stream_with_live_sender() {
        let (tx, source) = command_channel(4);
        source.close();

        let next = tokio::time::timeout(Duration::from_secs(1), source.next())
            .await
            .expect("closed source must not wait for senders");
        assert!(next.is_none());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn close_between_commands_is_not_lost() {
        let (tx, source) = command_channel(4);
        tx.send(Command::get("a")).await.unwrap();
        assert_eq!(source.next().await.unwrap().key, "a");

        // No consumer is inside `next` here.
        source.close();

        let next = tokio::time::timeout(Duration::from_secs(1), source.next())
            .await
            .expect("close issued between calls must still end the stream");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumer() {
        let (_tx, source) = command_channel(1);
        let source = Arc::new(source);

        let waiter = {
            let source = Arc::clone(&source);
            tokio::spawn(async move { source.next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.close();

        let next = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("blocked consumer should wake on close")
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn many_consumers_share_one_stream() {
        let (tx, source) = command_channel(4);
        let source = Arc::new(source);

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let source = Arc::clone(&source);
            consumers.push(tokio::spawn(async move {
                let mut seen = 0usize;
                while source.next().await.is_some() {
                    seen += 1;
                }
                seen
            }));
        }

        for i in 0..100 {
            tx.send(Command::add(format!("k{i}"), "v")).await.unwrap();
        }
        drop(tx);

        let mut total = 0;
        for consumer in consumers {
            total += consumer.await.unwrap();
        }
        assert_eq!(total, 100);
    }
}
