//! TCP collector server.
//!
//! ```text
//! TcpListener ──accept──► client task (one per sender)
//!                           read ─► FrameDecoder ─► FileAssembler ─► FileSink
//!                                                         │
//!                                                         ├─► files channel
//!                                                         └─► "received <name>\n" (optional ack)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::BytesMut;
use depthlink_core::FrameDecoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assembler::{FileAssembler, ReceivedFile};
use crate::config::ReceiverConfig;
use crate::sink::FileSink;

/// Capacity of the completed-files channel.
const FILES_CHANNEL_CAPACITY: usize = 256;

/// Handle to a running collector.
pub struct Receiver {
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Receiver {
    /// Bind the listener and start accepting senders.
    ///
    /// Returns the handle and a channel yielding every completed file. The
    /// channel should be drained; client tasks wait when it is full.
    /// Dropping the handle stops the collector like [`shutdown`](Self::shutdown).
    pub async fn bind(config: ReceiverConfig) -> Result<(Self, mpsc::Receiver<ReceivedFile>)> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("Binding collector on {}", config.listen_addr))?;
        let local_addr = listener.local_addr().context("Reading listener address")?;

        let (files_tx, files_rx) = mpsc::channel(FILES_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let ctx = Arc::new(ClientContext {
            decoder: FrameDecoder::new(config.max_chunk_len),
            sink: config.output_dir.clone().map(FileSink::new),
            ack_completed: config.ack_completed,
            files_tx,
        });

        match &ctx.sink {
            Some(sink) => info!("Collector listening on {} → {}", local_addr, sink.root().display()),
            None => info!("Collector listening on {} (in-memory only)", local_addr),
        }

        let accept_task = tokio::spawn(accept_loop(listener, ctx, stop_rx));
        Ok((
            Self {
                local_addr,
                stop_tx,
                accept_task,
            },
            files_rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every client connection.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.accept_task.await {
            warn!("Collector accept task ended abnormally: {}", e);
        }
        info!("Collector on {} stopped", self.local_addr);
    }
}

struct ClientContext {
    decoder: FrameDecoder,
    sink: Option<FileSink>,
    ack_completed: bool,
    files_tx: mpsc::Sender<ReceivedFile>,
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ClientContext>, mut stop_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("[+] Sender connected from {}", peer);
                    let ctx = Arc::clone(&ctx);
                    let stop_rx = stop_rx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, peer, &ctx, stop_rx).await {
                            warn!("Client {} ended with error: {:#}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ClientContext,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(64 * 1024);
    let mut assembler = FileAssembler::new();
    let mut completed = 0u64;

    loop {
        let n = tokio::select! {
            _ = stop_rx.changed() => {
                debug!("Closing client {} on shutdown", peer);
                break;
            }
            read = stream.read_buf(&mut buf) => read.with_context(|| format!("Reading from {}", peer))?,
        };
        if n == 0 {
            info!("[-] Sender {} disconnected ({} files, {} incomplete)", peer, completed, assembler.pending());
            break;
        }

        loop {
            let frame = match ctx.decoder.decode(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping bad frame from {}: {}", peer, e);
                    continue;
                }
                Err(e) => {
                    anyhow::bail!("Dropping {}: {}", peer, e);
                }
            };

            let Some(file) = assembler.push(frame) else {
                continue;
            };
            completed += 1;
            info!("Received {} ({}, {} bytes) from {}", file.filename, file.kind, file.data.len(), peer);

            if let Some(sink) = &ctx.sink {
                if let Err(e) = sink.write(&file).await {
                    warn!("Could not store {}: {:#}", file.filename, e);
                }
            }
            if ctx.ack_completed {
                let line = format!("received {}\n", file.filename);
                stream
                    .write_all(line.as_bytes())
                    .await
                    .with_context(|| format!("Acknowledging {} to {}", file.filename, peer))?;
            }
            if ctx.files_tx.send(file).await.is_err() {
                debug!("Files channel closed; completed file dropped");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthlink_core::{wire, Chunker, ContentKind, Payload};

    fn local_config(output: Option<&std::path::Path>, ack: bool) -> ReceiverConfig {
        ReceiverConfig {
            listen_addr: "127.0.0.1:0".to_owned(),
            output_dir: output.map(|p| p.to_path_buf()),
            ack_completed: ack,
            ..Default::default()
        }
    }

    fn encode_payload(payload: &Payload, chunk_size: usize) -> Vec<u8> {
        let chunker = Chunker::new(std::num::NonZeroUsize::new(chunk_size).unwrap());
        chunker
            .split(payload)
            .flat_map(|c| wire::encode(&c).data.to_vec())
            .collect()
    }

    #[tokio::test]
    async fn reassembles_files_written_in_arbitrary_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let (receiver, mut files) = Receiver::bind(local_config(Some(dir.path()), true)).await.unwrap();

        let payload = Payload::new(
            ContentKind::Image,
            "20241208_140309_45_frame000007.jpg",
            (0..5000u32).map(|i| (i * 7) as u8).collect::<Vec<_>>(),
        );
        let bytes = encode_payload(&payload, 1024);

        let mut client = TcpStream::connect(receiver.local_addr()).await.unwrap();
        for piece in bytes.chunks(333) {
            client.write_all(piece).await.unwrap();
        }

        let file = files.recv().await.unwrap();
        assert_eq!(file.filename, payload.filename);
        assert_eq!(file.data, payload.data);

        let mut ack = vec![0u8; "received ".len() + payload.filename.len() + 1];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, format!("received {}\n", payload.filename).into_bytes());

        let stored = dir.path().join("20241208_140309").join(&payload.filename);
        assert_eq!(std::fs::read(stored).unwrap(), payload.data.to_vec());

        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_chunk_drops_the_connection() {
        let mut config = local_config(None, false);
        config.max_chunk_len = 16;
        let (receiver, _files) = Receiver::bind(config).await.unwrap();

        let payload = Payload::new(ContentKind::Binary, "big.bin", vec![0u8; 64]);
        let mut client = TcpStream::connect(receiver.local_addr()).await.unwrap();
        client.write_all(&encode_payload(&payload, 64)).await.unwrap();

        let mut rest = Vec::new();
        let n = client.read_to_end(&mut rest).await.unwrap_or(0);
        assert_eq!(n, 0);
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_open_clients() {
        let (receiver, _files) = Receiver::bind(local_config(None, false)).await.unwrap();
        let mut client = TcpStream::connect(receiver.local_addr()).await.unwrap();
        // Let the accept loop pick the client up.
        tokio::task::yield_now().await;

        receiver.shutdown().await;
        let mut rest = Vec::new();
        let n = client.read_to_end(&mut rest).await.unwrap_or(0);
        assert_eq!(n, 0);
    }
}
