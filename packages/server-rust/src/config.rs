//! Configuration types for the `queuekv` server.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration aggregating every pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Worker pool settings.
    pub processor: ProcessorConfig,
    /// Queue polling settings.
    pub source: SourceConfig,
    /// Result output settings.
    pub sink: SinkConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of workers applying commands. Defaults to the number of
    /// logical CPUs.
    pub worker_count: usize,
    /// Capacity of the command-id idempotency cache. 0 disables
    /// deduplication.
    pub dedup_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            dedup_capacity: 0,
        }
    }
}

/// Logical CPU count, or 1 if it cannot be determined.
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Queue polling configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Number of concurrent poller tasks receiving from the queue.
    pub poller_count: usize,
    /// Maximum messages requested per receive call.
    pub batch_size: usize,
    /// Bounded channel capacity between pollers and workers. Clamped to at
    /// least 1.
    pub channel_capacity: usize,
    /// Delay before retrying after a failed receive.
    pub error_backoff: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            poller_count: 2,
            batch_size: 10,
            channel_capacity: 1,
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Output sink configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// File receiving result lines. `-` writes to stdout.
    pub path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("output.log"),
        }
    }
}
