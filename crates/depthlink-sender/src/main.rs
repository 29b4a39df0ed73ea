use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use depthlink_core::{Endpoint, LinkConfig};
use depthlink_transport_client::{
    ConnectionManager, Dispatcher, EndpointStore, JsonFileStore, MemoryStore, TcpTransport,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod capture;
mod pipeline;

use pipeline::PipelineConfig;

/// DepthLink sender: streams depth-camera payloads to a collector.
#[derive(Debug, Parser)]
#[command(name = "depthlink-sender", version)]
struct Cli {
    /// Collector host. With --host or --port the endpoint is updated and
    /// saved; otherwise the saved endpoint is used.
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<String>,

    /// Mock frames to send (0 = until Ctrl-C).
    #[arg(long, default_value_t = 30)]
    frames: u64,

    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Chunk size in bytes (default 1024).
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Do not read or write the saved endpoint.
    #[arg(long)]
    no_persist: bool,

    /// Files to send instead of running the mock capture. The content kind
    /// is taken from the extension (.jpg, .bin, .csv).
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("DepthLink Sender v{}", env!("CARGO_PKG_VERSION"));

    match run(Cli::parse()).await {
        Ok(()) => {
            info!("DepthLink Sender exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = LinkConfig::from_env();
    if let Some(size) = cli.chunk_size {
        config.chunk_size = size;
    }

    let store: Arc<dyn EndpointStore> = match JsonFileStore::default_location() {
        Some(store) if !cli.no_persist => {
            info!("Endpoint store: {}", store.path().display());
            Arc::new(store)
        }
        Some(_) => Arc::new(MemoryStore::new()),
        None => {
            warn!("No config directory on this platform; endpoint will not be saved");
            Arc::new(MemoryStore::new())
        }
    };

    let (transport, events) = TcpTransport::new();
    let link = ConnectionManager::new(Arc::new(transport), store, &config);
    let dispatcher = Dispatcher::new(link.clone(), &config).context("Invalid link configuration")?;

    // ── Connect ───────────────────────────────────────────────────────────
    if cli.host.is_some() || cli.port.is_some() {
        let current = link.endpoint();
        let host = cli.host.as_deref().unwrap_or(&current.host);
        let port = cli.port.clone().unwrap_or_else(|| current.port.to_string());
        let endpoint = Endpoint::parse(host, &port).context("Invalid endpoint")?;

        let outcome = link.update_connection(endpoint.clone()).await;
        if !outcome.is_success() {
            anyhow::bail!("Could not connect to {}: {:?}", endpoint, outcome);
        }
    } else {
        drop(link.connect_initial());
        // Head start for the startup connect so the first frames are not
        // all dropped.
        pipeline::await_startup(&link, pipeline::startup_limit(&config)).await;
    }

    // ── Stream ────────────────────────────────────────────────────────────
    let pipeline_config = PipelineConfig {
        frames: (cli.frames > 0).then_some(cli.frames),
        fps: cli.fps,
        files: cli.files,
        queue_capacity: config.queue_capacity,
        ..Default::default()
    };
    let result = pipeline::run(link.clone(), dispatcher, events, pipeline_config).await;

    link.shutdown().await;
    let stats = result?;
    info!(
        "Done: sent={} not_ready={} rejected={} aborted={}",
        stats.sent, stats.dropped_not_ready, stats.rejected, stats.aborted
    );
    Ok(())
}
