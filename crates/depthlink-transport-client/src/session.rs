//! TCP transport session (sender role).
//!
//! # Lifecycle
//!
//! ```text
//! 1. let (transport, events) = TcpTransport::new()
//! 2. transport.connect(&endpoint)            → Arc<dyn Session>
//!       └─ spawns a receive task forwarding collector responses to `events`
//! 3. session.send(frame) …                   ← one write per frame, in call order
//! 4. session.close()                          ← shuts down the write half, stops the reader
//! ```
//!
//! `close` does not wait behind a write blocked on a stalled collector: it
//! raises the session's close signal first, the in-flight write gives up and
//! drops the write half, and only then is the writer lock taken.
//!
//! A session returned by `connect` is not live for the rest of the system
//! until the [`ConnectionManager`](crate::ConnectionManager) installs it; a
//! session whose attempt lost the timeout race is simply closed.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use depthlink_core::{Endpoint, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ── Traits ────────────────────────────────────────────────────────────────────

/// Opens sessions to a collector. Implemented by [`TcpTransport`] and by test
/// doubles.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve once the connection is usable, or with the socket error.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Session>, TransportError>;
}

/// One open connection.
#[async_trait]
pub trait Session: Send + Sync {
    /// Write one encoded frame. Concurrent calls are serialised; each frame
    /// is written whole.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Later sends fail with `NotConnected`.
    async fn close(&self);
}

/// Notifications coming back from the collector side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Opaque bytes written by the collector, decoded lossily as UTF-8.
    Response { peer: SocketAddr, text: String },
    /// The collector closed the connection or the read side failed.
    Closed { peer: SocketAddr },
}

// ── TcpTransport ──────────────────────────────────────────────────────────────

/// TCP connector. Every session it opens reports to the same event channel.
#[derive(Clone)]
pub struct TcpTransport {
    events_tx: mpsc::Sender<SessionEvent>,
}

impl TcpTransport {
    pub fn new() -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        (Self { events_tx }, events_rx)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Session>, TransportError> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(recv_loop(read_half, self.events_tx.clone(), peer));

        info!("TCP session open to {} ({})", endpoint, peer);
        let (closing, _) = watch::channel(false);
        Ok(Arc::new(TcpSession {
            writer: Mutex::new(Some(write_half)),
            closing,
            reader,
            peer,
        }))
    }
}

// ── TcpSession ────────────────────────────────────────────────────────────────

pub struct TcpSession {
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Raised by `close` before it takes the writer lock.
    closing: watch::Sender<bool>,
    reader: JoinHandle<()>,
    peer: SocketAddr,
}

#[async_trait]
impl Session for TcpSession {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut closing = self.closing.subscribe();
        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = closing.wait_for(|c| *c) => return Err(TransportError::NotConnected),
        };
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let written = tokio::select! {
            res = writer.write_all(&frame) => Some(res),
            _ = closing.wait_for(|c| *c) => None,
        };
        let Some(written) = written else {
            debug!("Write to {} interrupted by close", self.peer);
            guard.take();
            return Err(TransportError::NotConnected);
        };
        if let Err(e) = written {
            // The stream is unusable after a failed write; drop it so later
            // frames fail fast instead of writing a torn stream.
            guard.take();
            return Err(match e.kind() {
                std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted => TransportError::ConnectionClosed,
                _ => TransportError::Io(e),
            });
        }
        Ok(())
    }

    async fn close(&self) {
        self.closing.send_replace(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of session to {}: {}", self.peer, e);
            }
        }
        self.reader.abort();
        info!("TCP session to {} closed", self.peer);
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ── Background receive loop ───────────────────────────────────────────────────

async fn recv_loop(
    mut reader: OwnedReadHalf,
    events_tx: mpsc::Sender<SessionEvent>,
    peer: SocketAddr,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Collector {} closed the connection", peer);
                break;
            }
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                debug!("Response from {}: {:?}", peer, text);
                if events_tx.send(SessionEvent::Response { peer, text }).await.is_err() {
                    debug!("Session event channel closed; stopping recv loop ({})", peer);
                    return;
                }
            }
            Err(e) => {
                warn!("Session receive error ({}): {}", peer, e);
                break;
            }
        }
    }
    let _ = events_tx.send(SessionEvent::Closed { peer }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[tokio::test]
    async fn writes_frames_in_order_and_reports_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut got = vec![0u8; 6];
            sock.read_exact(&mut got).await.unwrap();
            sock.write_all(b"received a.jpg\n").await.unwrap();
            got
        });

        let (transport, mut events) = TcpTransport::new();
        let session = transport
            .connect(&Endpoint::new("127.0.0.1", port).unwrap())
            .await
            .unwrap();
        session.send(Bytes::from_static(b"abc")).await.unwrap();
        session.send(Bytes::from_static(b"def")).await.unwrap();

        assert_eq!(server.await.unwrap(), b"abcdef");
        match events.recv().await.unwrap() {
            SessionEvent::Response { text, .. } => assert_eq!(text, "received a.jpg\n"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Closed { .. }));
    }

    #[tokio::test]
    async fn send_after_close_is_not_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });

        let (transport, _events) = TcpTransport::new();
        let session = transport
            .connect(&Endpoint::new("127.0.0.1", port).unwrap())
            .await
            .unwrap();
        let _server_side = accept.await.unwrap().unwrap();

        session.close().await;
        assert!(matches!(
            session.send(Bytes::from_static(b"x")).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_interrupts_write_to_stalled_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and never read.
        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });

        let (transport, _events) = TcpTransport::new();
        let session = transport
            .connect(&Endpoint::new("127.0.0.1", port).unwrap())
            .await
            .unwrap();
        let _server_side = accept.await.unwrap().unwrap();

        let writer = Arc::clone(&session);
        let send = tokio::spawn(async move { writer.send(Bytes::from(vec![0u8; 64 * 1024 * 1024])).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!send.is_finished(), "write should be blocked on the full socket");

        timeout(Duration::from_secs(3), session.close())
            .await
            .expect("close waited behind the blocked write");
        let res = timeout(Duration::from_secs(3), send).await.unwrap().unwrap();
        assert!(matches!(res, Err(TransportError::NotConnected)));
        assert!(matches!(
            session.send(Bytes::from_static(b"x")).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn refused_connect_is_an_io_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let (transport, _events) = TcpTransport::new();
        let res = transport.connect(&Endpoint::new("127.0.0.1", port).unwrap()).await;
        assert!(matches!(res, Err(TransportError::Io(_))));
    }
}
