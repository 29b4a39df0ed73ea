use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use depthlink_receiver::{Receiver, ReceiverConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// DepthLink collector: receives chunked sensor files over TCP.
#[derive(Debug, Parser)]
#[command(name = "depthlink-receiver", version)]
struct Cli {
    /// JSON config file; environment variables and flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:5678.
    #[arg(long)]
    listen: Option<String>,

    /// Root directory for event folders.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Keep completed files in memory only.
    #[arg(long, conflicts_with = "output")]
    no_store: bool,

    /// Reply `received <filename>` for every completed file.
    #[arg(long)]
    ack: bool,
}

impl Cli {
    fn into_config(self) -> Result<ReceiverConfig> {
        let base = match &self.config {
            Some(path) => ReceiverConfig::load(path)?,
            None => ReceiverConfig::default(),
        };
        let mut cfg = base.merge_lookup(|key| std::env::var(key).ok());
        if let Some(listen) = self.listen {
            cfg.listen_addr = listen;
        }
        if let Some(output) = self.output {
            cfg.output_dir = Some(output);
        }
        if self.no_store {
            cfg.output_dir = None;
        }
        cfg.ack_completed |= self.ack;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=debug for per-chunk detail
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("DepthLink Receiver v{}", env!("CARGO_PKG_VERSION"));

    match run(Cli::parse()).await {
        Ok(()) => {
            info!("DepthLink Receiver exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    let (receiver, mut files) = Receiver::bind(config).await?;
    info!("Waiting for senders on {}", receiver.local_addr());

    let mut total_files = 0u64;
    let mut total_bytes = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            maybe_file = files.recv() => {
                let Some(file) = maybe_file else { break };
                total_files += 1;
                total_bytes += file.data.len() as u64;
                tracing::debug!("{} {} ({} bytes)", file.kind, file.filename, file.data.len());
            }
        }
    }

    receiver.shutdown().await;
    info!("Collected {} files, {} bytes", total_files, total_bytes);
    Ok(())
}
