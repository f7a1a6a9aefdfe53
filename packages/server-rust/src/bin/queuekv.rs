//! `queuekv` entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{debug, info};

use queuekv_server::cli::{Cli, Mode, ServeArgs};
use queuekv_server::client::translate;
use queuekv_server::server::{serve, shutdown_signal};
use queuekv_server::sink::StreamSink;
use queuekv_server::source::LineQueue;
use queuekv_server::telemetry::init_tracing;

fn main() -> anyhow::Result<()> {
    // Loaded before parsing so `.env` values feed clap's `env` fallbacks.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.log_filter, cli.json_logs);
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded environment file"),
        Err(err) => debug!(error = %err, "no environment file loaded"),
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async {
        match cli.mode {
            Mode::Serve(args) => run_serve(&args).await,
            Mode::Client => run_client().await,
        }
    });

    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run_serve(args: &ServeArgs) -> anyhow::Result<()> {
    let config = args.to_config();

    // Construction failures here are the only fatal errors.
    let sink = Arc::new(StreamSink::from_config(&config.sink).await?);
    let queue = Arc::new(LineQueue::new(BufReader::new(tokio::io::stdin())));

    let map = serve(queue, sink, &config, shutdown_signal()).await?;
    info!(entries = map.len(), "final map size");
    Ok(())
}

async fn run_client() -> anyhow::Result<()> {
    eprintln!("Usage: {}", queuekv_core::USAGE);
    let counts = translate(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    info!(sent = counts.sent, rejected = counts.rejected, "client finished");
    Ok(())
}
