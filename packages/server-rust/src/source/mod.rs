//! Command sources feeding the worker pool.
//!
//! - [`CommandSource`]: the blocking pull contract workers consume
//! - [`ChannelSource`]: in-process multi-consumer channel
//! - [`QueueCommandSource`]: pollers draining a [`QueueClient`] into a channel
//! - [`LineQueue`] / [`MemoryQueue`]: concrete queue transports

pub mod channel;
pub mod line;
pub mod memory;
pub mod queue;

pub use channel::{command_channel, ChannelSource, CommandSender};
pub use line::LineQueue;
pub use memory::MemoryQueue;
pub use queue::{QueueClient, QueueCommandSource, QueueMessage};

use async_trait::async_trait;
use queuekv_core::Command;

/// Producer of the commands the worker pool applies.
///
/// Shared by every worker as `Arc<dyn CommandSource>`. Delivery is treated
/// as at-least-once; acknowledgment and redelivery belong to the source.
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Waits for the next command. `None` means the source is closed and
    /// drained, and the calling worker should exit.
    async fn next(&self) -> Option<Command>;
}
