//! Pipeline assembly and ordered shutdown.
//!
//! Startup: queue pollers, then the worker pool. Shutdown runs in reverse
//! dependency order so nothing writes to a closed sink:
//!
//! 1. Close the command source (pollers stop, buffered commands drain)
//! 2. Stop the processor (every worker finishes its current command)
//! 3. Close the sink (pending lines are flushed)

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::processor::{CommandProcessor, ProcessorError, StringMap};
use crate::sink::OutputSink;
use crate::source::{CommandSource, QueueClient, QueueCommandSource};

/// Runs the pipeline until `shutdown` resolves or the queue is exhausted.
///
/// Returns the map as it stood after the last worker exited.
///
/// # Errors
///
/// Returns [`ProcessorError::NoWorkers`] for a zero worker count, checked
/// before any message is taken off the queue. Also returns an error if the
/// sink fails to flush on close.
pub async fn serve<Q: QueueClient>(
    queue: Arc<Q>,
    sink: Arc<dyn OutputSink>,
    config: &ServerConfig,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<Arc<StringMap>> {
    if config.processor.worker_count == 0 {
        sink.close().await?;
        return Err(ProcessorError::NoWorkers.into());
    }

    let source = Arc::new(QueueCommandSource::start(queue, &config.source));
    let commands: Arc<dyn CommandSource> = source.clone();

    let mut processor = CommandProcessor::new(commands, Arc::clone(&sink), &config.processor);
    if let Err(err) = processor.start(config.processor.worker_count) {
        source.close().await;
        sink.close().await?;
        return Err(err.into());
    }
    info!(workers = config.processor.worker_count, "server started");

    tokio::select! {
        () = shutdown => info!("shutdown requested"),
        () = source.exhausted() => info!("command source exhausted"),
    }

    info!("server is shutting down");
    source.close().await;
    processor.stop().await;
    sink.close().await?;
    info!("server stopped gracefully");

    Ok(processor.map())
}

/// Resolves on ctrl-c, or on SIGTERM where the platform has it.
///
/// A signal that cannot be listened for is logged and never resolves.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}
