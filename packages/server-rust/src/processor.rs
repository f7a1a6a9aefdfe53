//! Worker pool applying queued commands to the shared ordered map.
//!
//! Every worker runs the same loop: pull the next [`Command`] from the
//! [`CommandSource`], apply it, repeat until the source reports closed.
//! Workers share one `OrderedMap` and one [`OutputSink`] and nothing else.
//!
//! # Ordering
//!
//! Commands handed to different workers run concurrently with no ordering
//! between them. Two commands on the same key that land on different workers
//! may apply in either order; the final state is whichever `put`/`remove`
//! executed last. The map's own iteration order reflects the order `put`
//! calls actually ran, not the order the source produced them.
//!
//! # Failure handling
//!
//! There is no synchronous caller to report to. Unrecognized command types,
//! missing keys and duplicate ids are logged and skipped; none of them stop
//! a worker.

use std::sync::Arc;

use queuekv_core::{Command, CommandType, OrderedMap};
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, info, warn};

use crate::config::ProcessorConfig;
use crate::dedup::IdempotencyCache;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::sink::OutputSink;
use crate::source::CommandSource;

/// The map type the processor maintains.
pub type StringMap = OrderedMap<String, String>;

/// Errors from misusing the processor lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("command processor already started")]
    AlreadyStarted,
    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Formats one result line.
#[must_use]
pub fn format_entry(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Applies commands to the map and emits result lines. Shared by every
/// worker.
struct Dispatcher {
    map: Arc<StringMap>,
    sink: Arc<dyn OutputSink>,
    dedup: Option<IdempotencyCache>,
}

impl Dispatcher {
    fn apply(&self, command: Command) {
        let span = debug_span!("command", kind = %command.kind, id = %command.id);
        let _enter = span.enter();

        if let Some(dedup) = &self.dedup {
            if !dedup.first_sighting(&command.id) {
                debug!("duplicate delivery, skipping");
                metrics::counter!("queuekv_commands_discarded_total", "reason" => "duplicate")
                    .increment(1);
                return;
            }
        }

        let kind = command.kind.as_str().to_string();
        metrics::counter!("queuekv_commands_total", "type" => kind).increment(1);

        match command.kind {
            CommandType::Add => {
                debug!(key = %command.key, value = %command.value, "add-item");
                self.map.put(command.key, command.value);
            }
            CommandType::Delete => {
                debug!(key = %command.key, "delete-item");
                self.map.remove(command.key.as_str());
            }
            CommandType::Get => match self.map.get(command.key.as_str()) {
                Some(value) => {
                    debug!(key = %command.key, %value, "get-item");
                    self.sink.write(format_entry(&command.key, &value));
                }
                None => debug!(key = %command.key, "get-item: key not found"),
            },
            CommandType::GetAll => {
                let entries = self.map.snapshot();
                for (key, value) in &entries {
                    self.sink.write(format_entry(key, value));
                }
                debug!(items = entries.len(), "get-all-items");
            }
            CommandType::Unrecognized(raw) => {
                warn!(kind = %raw, "unknown command type, discarding");
                metrics::counter!("queuekv_commands_discarded_total", "reason" => "unknown_type")
                    .increment(1);
            }
        }
    }
}

/// Fixed-size pool of workers draining a [`CommandSource`].
///
/// Lifecycle: [`new`](Self::new) wires collaborators, [`start`](Self::start)
/// spawns workers, [`stop`](Self::stop) waits for them. Close the source
/// before calling `stop`; workers only exit once it is drained.
pub struct CommandProcessor {
    source: Arc<dyn CommandSource>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<Lifecycle>,
    workers: Vec<JoinHandle<()>>,
}

impl CommandProcessor {
    /// Creates a processor with a fresh, empty map.
    #[must_use]
    pub fn new(
        source: Arc<dyn CommandSource>,
        sink: Arc<dyn OutputSink>,
        config: &ProcessorConfig,
    ) -> Self {
        Self::with_map(source, sink, Arc::new(StringMap::new()), config)
    }

    /// Creates a processor operating on an existing map.
    #[must_use]
    pub fn with_map(
        source: Arc<dyn CommandSource>,
        sink: Arc<dyn OutputSink>,
        map: Arc<StringMap>,
        config: &ProcessorConfig,
    ) -> Self {
        let dedup = (config.dedup_capacity > 0).then(|| {
            info!(capacity = config.dedup_capacity, "command id deduplication enabled");
            IdempotencyCache::new(config.dedup_capacity)
        });

        Self {
            source,
            dispatcher: Arc::new(Dispatcher { map, sink, dedup }),
            lifecycle: Arc::new(Lifecycle::new()),
            workers: Vec::new(),
        }
    }

    /// Spawns `worker_count` workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::NoWorkers`] for a zero count and
    /// [`ProcessorError::AlreadyStarted`] if called more than once.
    pub fn start(&mut self, worker_count: usize) -> Result<(), ProcessorError> {
        if worker_count == 0 {
            return Err(ProcessorError::NoWorkers);
        }
        if self.lifecycle.state() != LifecycleState::Starting {
            return Err(ProcessorError::AlreadyStarted);
        }

        self.workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&self.source),
                    Arc::clone(&self.dispatcher),
                    Arc::clone(&self.lifecycle),
                ))
            })
            .collect();
        self.lifecycle.set_running();

        info!(workers = worker_count, "command processor started");
        Ok(())
    }

    /// Waits for every worker to finish.
    ///
    /// Workers are never interrupted mid-command: each one exits after the
    /// source reports closed, so stopping is a state change plus a join.
    /// Returns immediately if the processor was never started or has
    /// already stopped.
    pub async fn stop(&mut self) {
        info!("stopping command processor");
        self.lifecycle.set_draining();

        for (worker_id, handle) in self.workers.drain(..).enumerate() {
            if let Err(err) = handle.await {
                error!(worker_id, error = %err, "worker terminated abnormally");
            }
        }

        self.lifecycle.set_stopped();
        info!("command processor stopped");
    }

    /// Shared handle to the map.
    #[must_use]
    pub fn map(&self) -> Arc<StringMap> {
        Arc::clone(&self.dispatcher.map)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Commands currently being applied.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.lifecycle.in_flight_count()
    }
}

async fn worker_loop(
    worker_id: usize,
    source: Arc<dyn CommandSource>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<Lifecycle>,
) {
    debug!(worker_id, "worker started");
    while let Some(command) = source.next().await {
        let _in_flight = lifecycle.in_flight_guard();
        dispatcher.apply(command);
    }
    debug!(worker_id, "command source closed, worker exiting");
}
