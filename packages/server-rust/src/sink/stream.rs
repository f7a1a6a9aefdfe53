//! [`OutputSink`] over any async byte stream (a file or stdout).
//!
//! A single writer task owns the stream. Callers hand lines over an
//! unbounded channel, so `write` never blocks and concurrent writers end up
//! in one total order: the order the channel received them.

use std::io;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use super::OutputSink;
use crate::config::SinkConfig;

/// Newline-terminated line writer backed by a dedicated task.
pub struct StreamSink {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    writer: Mutex<Option<JoinHandle<io::Result<u64>>>>,
}

impl StreamSink {
    /// Starts the writer task over `writer`. Must be called inside a tokio
    /// runtime.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(writer, rx));
        Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
        }
    }

    /// Creates (or truncates) `path` and writes to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub async fn create_file(path: &Path) -> anyhow::Result<Self> {
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        info!(path = %path.display(), "writing results to file");
        Ok(Self::new(file))
    }

    /// Opens the destination named by `config`; `-` means stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if the output file cannot be created.
    pub async fn from_config(config: &SinkConfig) -> anyhow::Result<Self> {
        if config.path.as_os_str() == "-" {
            info!("writing results to stdout");
            Ok(Self::new(tokio::io::stdout()))
        } else {
            Self::create_file(&config.path).await
        }
    }
}

async fn write_loop<W>(writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BufWriter::new(writer);
    let mut written = 0u64;

    while let Some(line) = rx.recv().await {
        trace!(%line, "writing output line");
        let result = async {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await
        }
        .await;
        match result {
            Ok(()) => written += 1,
            Err(err) => warn!(error = %err, "failed to write output line"),
        }
    }

    out.flush().await?;
    out.shutdown().await?;
    Ok(written)
}

#[async_trait]
impl OutputSink for StreamSink {
    fn write(&self, line: String) {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) if tx.send(line).is_ok() => {
                metrics::counter!("queuekv_output_lines_total").increment(1);
            }
            _ => warn!("output sink closed, dropping line"),
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        // Dropping the sender ends the writer loop once the channel drains.
        self.tx.lock().take();
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            let written = handle.await.context("output writer task failed")??;
            info!(lines = written, "output sink closed");
        }
        Ok(())
    }
}
