//! [`QueueClient`] over a stream of newline-delimited message bodies.
//!
//! Each non-blank line is one message. End of stream means the queue is
//! exhausted. A byte stream cannot take acknowledgments back, so `delete`
//! only checks that the receipt was handed out.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Mutex;
use tracing::trace;

use super::queue::{QueueClient, QueueMessage};

/// Line-oriented queue, typically wrapping stdin.
pub struct LineQueue<R> {
    lines: Mutex<Lines<R>>,
    next_receipt: AtomicU64,
}

impl<R> LineQueue<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
            next_receipt: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl<R> QueueClient for LineQueue<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Returns at most one line per call so a slow producer never stalls a
    /// batch that is already readable.
    async fn receive(&self, _max_messages: usize) -> anyhow::Result<Option<Vec<QueueMessage>>> {
        let mut lines = self.lines.lock().await;
        loop {
            let Some(line) = lines.next_line().await? else {
                return Ok(None);
            };
            let body = line.trim();
            if body.is_empty() {
                continue;
            }
            let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed);
            trace!(receipt, "read queue line");
            return Ok(Some(vec![QueueMessage {
                body: body.to_string(),
                receipt: receipt.to_string(),
            }]));
        }
    }

    async fn delete(&self, receipt: &str) -> anyhow::Result<()> {
        let issued = self.next_receipt.load(Ordering::Relaxed);
        match receipt.parse::<u64>() {
            Ok(n) if n < issued => Ok(()),
            _ => anyhow::bail!("unknown receipt: {receipt}"),
        }
    }
}
