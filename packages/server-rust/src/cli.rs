//! Command-line interface for the `queuekv` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    default_worker_count, ProcessorConfig, ServerConfig, SinkConfig, SourceConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "QUEUEKV_LOG", default_value = "info", global = true)]
    pub log_filter: String,

    /// Emit logs as JSON.
    #[arg(long, env = "QUEUEKV_LOG_JSON", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Apply JSON commands read from stdin, one per line, until EOF or ctrl-c.
    Serve(ServeArgs),
    /// Turn text commands on stdin into JSON commands on stdout.
    Client,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Worker count. Defaults to the number of logical CPUs.
    #[arg(long, env = "QUEUEKV_WORKERS")]
    pub workers: Option<usize>,

    /// Concurrent queue pollers.
    #[arg(long, env = "QUEUEKV_POLLERS", default_value_t = 2)]
    pub pollers: usize,

    /// Maximum messages per receive call.
    #[arg(long, env = "QUEUEKV_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Buffered commands between pollers and workers.
    #[arg(long, env = "QUEUEKV_CHANNEL_CAPACITY", default_value_t = 1)]
    pub channel_capacity: usize,

    /// Delay before retrying a failed receive, in milliseconds.
    #[arg(long, env = "QUEUEKV_ERROR_BACKOFF_MS", default_value_t = 1000)]
    pub error_backoff_ms: u64,

    /// Remember this many command ids and skip redeliveries. 0 disables.
    #[arg(long, env = "QUEUEKV_DEDUP_CAPACITY", default_value_t = 0)]
    pub dedup_capacity: usize,

    /// Result file; `-` for stdout.
    #[arg(long, env = "QUEUEKV_OUTPUT", default_value = "output.log")]
    pub output: PathBuf,
}

impl ServeArgs {
    /// Builds the server configuration these arguments describe.
    #[must_use]
    pub fn to_config(&self) -> ServerConfig {
        ServerConfig {
            processor: ProcessorConfig {
                worker_count: self.workers.unwrap_or_else(default_worker_count).max(1),
                dedup_capacity: self.dedup_capacity,
            },
            source: SourceConfig {
                poller_count: self.pollers,
                batch_size: self.batch_size,
                channel_capacity: self.channel_capacity,
                error_backoff: Duration::from_millis(self.error_backoff_ms),
            },
            sink: SinkConfig {
                path: self.output.clone(),
            },
        }
    }
}
