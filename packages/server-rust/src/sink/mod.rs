//! Output sinks receiving result lines from the worker pool.

pub mod memory;
pub mod stream;

pub use memory::MemorySink;
pub use stream::StreamSink;

use async_trait::async_trait;

/// Destination for result lines.
///
/// Implementations serialize concurrent writers into one total order.
/// Failures are the sink's to log; callers never see them.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Queues `line` for recording without blocking the caller.
    fn write(&self, line: String);

    /// Drains pending writes and releases the destination. Lines written
    /// after close are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    async fn close(&self) -> anyhow::Result<()>;
}
