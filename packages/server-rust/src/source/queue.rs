//! Polling queue transport adapter.
//!
//! [`QueueCommandSource`] runs a fixed set of poller tasks against a
//! [`QueueClient`]. Each poller receives a batch, decodes every body into a
//! [`Command`], forwards it into an internal [`ChannelSource`], and only then
//! deletes the message from the queue. A message that was received but not
//! forwarded before cancellation is left alone for the transport to
//! redeliver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use queuekv_core::Command;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::channel::{command_channel, ChannelSource, CommandSender};
use super::CommandSource;
use crate::config::SourceConfig;
use crate::lifecycle::{cancelled, Lifecycle, LifecycleState};

/// One message received from a queue transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Serialized command.
    pub body: String,
    /// Transport handle used to acknowledge the message.
    pub receipt: String,
}

/// Minimal polling queue transport.
#[async_trait]
pub trait QueueClient: Send + Sync + 'static {
    /// Receives up to `max_messages` messages. An empty batch means nothing
    /// arrived within the transport's own wait time. `None` means the queue
    /// is exhausted and will never yield again.
    async fn receive(&self, max_messages: usize) -> anyhow::Result<Option<Vec<QueueMessage>>>;

    /// Acknowledges a message so it is not redelivered.
    async fn delete(&self, receipt: &str) -> anyhow::Result<()>;
}

/// Why a poller loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollerExit {
    Cancelled,
    Exhausted,
    ChannelClosed,
}

/// Command source backed by a polling queue transport.
pub struct QueueCommandSource {
    commands: ChannelSource,
    lifecycle: Arc<Lifecycle>,
    done: watch::Receiver<bool>,
}

impl QueueCommandSource {
    /// Spawns `config.poller_count` pollers (at least one) against `client`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<Q: QueueClient>(client: Arc<Q>, config: &SourceConfig) -> Self {
        let (tx, commands) = command_channel(config.channel_capacity);
        let lifecycle = Arc::new(Lifecycle::new());
        let (done_tx, done) = watch::channel(false);

        let poller_count = config.poller_count.max(1);
        info!(pollers = poller_count, "starting queue pollers");

        let mut pollers = JoinSet::new();
        for poller_id in 0..poller_count {
            pollers.spawn(poll_loop(
                poller_id,
                Arc::clone(&client),
                tx.clone(),
                lifecycle.cancellation(),
                config.batch_size.max(1),
                config.error_backoff,
            ));
        }
        // Pollers hold the only senders; the channel closes when they exit.
        drop(tx);
        lifecycle.set_running();

        let supervisor_lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move {
            while let Some(joined) = pollers.join_next().await {
                match joined {
                    Ok(exit) => debug!(?exit, "poller exited"),
                    Err(err) => error!(%err, "poller task failed"),
                }
            }
            supervisor_lifecycle.set_stopped();
            let _ = done_tx.send(true);
        });

        Self {
            commands,
            lifecycle,
            done,
        }
    }

    /// Resolves once every poller has exited, whether the queue ran dry or
    /// the source was closed.
    pub async fn exhausted(&self) {
        let mut done = self.done.clone();
        cancelled(&mut done).await;
    }

    /// Cancels the pollers and waits for them to exit.
    ///
    /// Commands already forwarded stay buffered for the workers, which
    /// receive `None` once the buffer is drained.
    pub async fn close(&self) {
        info!("stopping queue pollers");
        self.lifecycle.cancel();
        self.exhausted().await;
    }

    /// Poller lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }
}

#[async_trait]
impl CommandSource for QueueCommandSource {
    async fn next(&self) -> Option<Command> {
        self.commands.next().await
    }
}

async fn poll_loop<Q: QueueClient>(
    poller_id: usize,
    client: Arc<Q>,
    tx: CommandSender,
    mut cancel: watch::Receiver<bool>,
    batch_size: usize,
    error_backoff: Duration,
) -> PollerExit {
    loop {
        let received = tokio::select! {
            biased;
            () = cancelled(&mut cancel) => return PollerExit::Cancelled,
            received = client.receive(batch_size) => received,
        };

        let messages = match received {
            Ok(Some(messages)) => messages,
            Ok(None) => {
                info!(poller_id, "queue exhausted");
                return PollerExit::Exhausted;
            }
            Err(err) => {
                warn!(poller_id, error = %err, "failed to receive from queue");
                tokio::select! {
                    biased;
                    () = cancelled(&mut cancel) => return PollerExit::Cancelled,
                    () = tokio::time::sleep(error_backoff) => {}
                }
                continue;
            }
        };

        for message in messages {
            match Command::decode(&message.body) {
                Ok(command) => {
                    debug!(poller_id, kind = %command.kind, id = %command.id, "received command");
                    tokio::select! {
                        biased;
                        () = cancelled(&mut cancel) => return PollerExit::Cancelled,
                        sent = tx.send(command) => {
                            if sent.is_err() {
                                return PollerExit::ChannelClosed;
                            }
                        }
                    }
                }
                Err(err) => {
                    // Acknowledged anyway so a poison body is not redelivered forever.
                    warn!(poller_id, error = %err, "discarding undecodable message");
                    metrics::counter!("queuekv_commands_discarded_total", "reason" => "decode")
                        .increment(1);
                }
            }

            if let Err(err) = client.delete(&message.receipt).await {
                warn!(poller_id, receipt = %message.receipt, error = %err, "failed to delete message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use queuekv_core::CommandType;

    use super::*;
    use crate::source::MemoryQueue;

    fn config(pollers: usize) -> SourceConfig {
        SourceConfig {
            poller_count: pollers,
            batch_size: 3,
            channel_capacity: 4,
            error_backoff: Duration::from_millis(5),
        }
    }

    async fn drain(source: &QueueCommandSource) -> Vec<Command> {
        let mut out = Vec::new();
        while let Some(command) =
            tokio::time::timeout(Duration::from_secs(2), source.next())
                .await
                .expect("source should not stall")
        {
            out.push(command);
        }
        out
    }

    #[tokio::test]
    async fn forwards_and_acknowledges_messages() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..7 {
            queue.push(Command::add(format!("k{i}"), "v").encode().unwrap());
        }
        queue.close();

        let source = QueueCommandSource::start(Arc::clone(&queue), &config(2));
        let commands = drain(&source).await;

        let keys: HashSet<String> = commands.into_iter().map(|c| c.key).collect();
        assert_eq!(keys.len(), 7);
        source.exhausted().await;
        assert_eq!(queue.deleted().len(), 7);
        assert_eq!(queue.pending(), 0);
        assert_eq!(source.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn single_poller_preserves_queue_order() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..5 {
            queue.push(Command::add(format!("k{i}"), "v").encode().unwrap());
        }
        queue.close();

        let source = QueueCommandSource::start(queue, &config(1));
        let keys: Vec<String> = drain(&source).await.into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);
    }

    #[tokio::test]
    async fn undecodable_bodies_are_skipped_and_deleted() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("{not json");
        queue.push(r#"{"type":"mystery"}"#);
        queue.push(Command::get("a").encode().unwrap());
        queue.close();

        let source = QueueCommandSource::start(Arc::clone(&queue), &config(1));
        let commands = drain(&source).await;

        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0].kind,
            CommandType::Unrecognized("mystery".to_string())
        );
        assert_eq!(commands[1].kind, CommandType::Get);
        source.exhausted().await;
        assert_eq!(queue.deleted().len(), 3);
    }

    #[tokio::test]
    async fn receive_errors_are_retried() {
        let queue = Arc::new(MemoryQueue::new());
        queue.fail_next_receives(3);
        queue.push(Command::get_all().encode().unwrap());
        queue.close();

        let source = QueueCommandSource::start(queue, &config(1));
        let commands = drain(&source).await;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, CommandType::GetAll);
    }

    #[tokio::test]
    async fn close_stops_idle_pollers() {
        let queue = Arc::new(MemoryQueue::new());
        let source = QueueCommandSource::start(Arc::clone(&queue), &config(3));
        assert_eq!(source.state(), LifecycleState::Running);

        tokio::time::timeout(Duration::from_secs(1), source.close())
            .await
            .expect("close should not hang on an idle queue");

        assert_eq!(source.state(), LifecycleState::Stopped);
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn unforwarded_messages_are_not_acknowledged() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..10 {
            queue.push(Command::add(format!("k{i}"), "v").encode().unwrap());
        }

        // Capacity 1 and no consumer: the poller blocks on the second send.
        let source = QueueCommandSource::start(
            Arc::clone(&queue),
            &SourceConfig {
                poller_count: 1,
                batch_size: 10,
                channel_capacity: 1,
                error_backoff: Duration::from_millis(5),
            },
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.close().await;

        let forwarded = drain(&source).await;
        assert_eq!(forwarded.len(), 1);
        assert_eq!(queue.deleted().len(), 1);
        assert_eq!(queue.unacknowledged(), 9);

        queue.requeue_unacknowledged();
        assert_eq!(queue.pending(), 9);
    }
}
