//! Transmission gate: the single entry point producers use to send payloads.

use std::sync::Arc;

use bytes::Bytes;
use depthlink_core::wire::{self, MAX_FILENAME_LEN};
use depthlink_core::{ConfigError, ContentKind, Chunker, LinkConfig, Payload, TransportError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::link::ConnectionManager;

/// What happened to one payload. Informational; producers never have to
/// handle it.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The link was not ready; nothing was written.
    NotReady,
    /// The filename does not fit the frame header; nothing was written.
    Rejected,
    Sent { chunks: usize, bytes: usize },
    /// A write failed part-way; the remaining chunks were dropped.
    Aborted {
        sent_chunks: usize,
        total_chunks: usize,
        error: TransportError,
    },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Chunks, encodes and writes payloads over the manager's live session.
///
/// `Dispatcher` is `Clone`; clones share one send lane, so chunks of
/// different payloads never interleave on the wire.
#[derive(Clone)]
pub struct Dispatcher {
    link: ConnectionManager,
    chunker: Chunker,
    lane: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(link: ConnectionManager, config: &LinkConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            link,
            chunker: Chunker::new(config.chunk_size()?),
            lane: Arc::new(Mutex::new(())),
        })
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    pub async fn send_payload(&self, payload: &Payload) -> DispatchOutcome {
        if payload.filename.len() > MAX_FILENAME_LEN {
            warn!(
                "Rejecting {} payload: filename is {} bytes (max {})",
                payload.kind,
                payload.filename.len(),
                MAX_FILENAME_LEN
            );
            return DispatchOutcome::Rejected;
        }

        let _lane = self.lane.lock().await;
        let Some(session) = self.link.session_if_ready() else {
            warn!("Link not ready; dropping {} ({} bytes)", payload.filename, payload.len());
            return DispatchOutcome::NotReady;
        };

        let chunks = self.chunker.split(payload);
        let total_chunks = chunks.len();
        let mut sent_chunks = 0;
        for chunk in chunks {
            let frame = wire::encode(&chunk);
            if frame.filename_dropped {
                warn!("Filename of {} payload dropped from frame header", payload.kind);
            }
            if let Err(error) = session.send(frame.data).await {
                warn!(
                    "Send of {} failed at chunk {}/{}: {}",
                    payload.filename,
                    sent_chunks + 1,
                    total_chunks,
                    error
                );
                return DispatchOutcome::Aborted {
                    sent_chunks,
                    total_chunks,
                    error,
                };
            }
            sent_chunks += 1;
        }

        debug!(
            "Sent {} kind={} chunks={} bytes={}",
            payload.filename,
            payload.kind,
            total_chunks,
            payload.len()
        );
        DispatchOutcome::Sent {
            chunks: total_chunks,
            bytes: payload.len(),
        }
    }

    /// Send a JPEG; `.jpg` is appended to `name` unless present.
    pub async fn send_image(&self, name: &str, data: impl Into<Bytes>) -> DispatchOutcome {
        self.send_kind(ContentKind::Image, name, data.into()).await
    }

    /// Send a raw blob; `.bin` is appended to `name` unless present.
    pub async fn send_binary(&self, name: &str, data: impl Into<Bytes>) -> DispatchOutcome {
        self.send_kind(ContentKind::Binary, name, data.into()).await
    }

    /// Send CSV text; `.csv` is appended to `name` unless present.
    pub async fn send_metadata(&self, name: &str, data: impl Into<Bytes>) -> DispatchOutcome {
        self.send_kind(ContentKind::Metadata, name, data.into()).await
    }

    async fn send_kind(&self, kind: ContentKind, name: &str, data: Bytes) -> DispatchOutcome {
        let payload = Payload::new(kind, with_extension(name, kind), data);
        self.send_payload(&payload).await
    }
}

/// `name` with the kind's extension appended unless it already ends in it.
pub fn with_extension(name: &str, kind: ContentKind) -> String {
    let ext = kind.extension();
    let has_ext = name
        .rsplit_once('.')
        .is_some_and(|(_, tail)| tail.eq_ignore_ascii_case(ext));
    if has_ext {
        name.to_owned()
    } else {
        format!("{}.{}", name, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, Script};
    use crate::store::MemoryStore;
    use bytes::BytesMut;
    use depthlink_core::{Endpoint, FrameDecoder};

    async fn ready_dispatcher(transport: &Arc<MockTransport>, chunk_size: usize) -> Dispatcher {
        let config = LinkConfig { chunk_size, ..Default::default() };
        let link = ConnectionManager::new(transport.clone(), Arc::new(MemoryStore::new()), &config);
        let outcome = link.update_connection(Endpoint::new("10.0.0.5", 9000).unwrap()).await;
        assert!(outcome.is_success());
        Dispatcher::new(link, &config).unwrap()
    }

    fn decode_all(frames: &[Bytes]) -> Vec<depthlink_core::DecodedFrame> {
        let mut stream = BytesMut::new();
        for f in frames {
            stream.extend_from_slice(f);
        }
        let decoder = FrameDecoder::default();
        let mut out = Vec::new();
        while let Some(frame) = decoder.decode(&mut stream).unwrap() {
            out.push(frame);
        }
        assert!(stream.is_empty());
        out
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_performs_zero_writes() {
        let transport = MockTransport::new([Script::Hang]);
        let config = LinkConfig::default();
        let link = ConnectionManager::new(transport.clone(), Arc::new(MemoryStore::new()), &config);
        let dispatcher = Dispatcher::new(link.clone(), &config).unwrap();

        let outcome = dispatcher.send_image("a", vec![1u8; 10]).await;
        assert!(matches!(outcome, DispatchOutcome::NotReady));

        // Still not ready while connecting.
        link.begin_update(Endpoint::new("10.0.0.5", 9000).unwrap(), |_| {});
        let outcome = dispatcher.send_binary("b", vec![1u8; 10]).await;
        assert!(matches!(outcome, DispatchOutcome::NotReady));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_chunks_in_order() {
        let transport = MockTransport::new([Script::Succeed]);
        let dispatcher = ready_dispatcher(&transport, 1024).await;

        let data: Vec<u8> = (0..2500u32).map(|i| i as u8).collect();
        let outcome = dispatcher.send_binary("20241208_140309_45_frame000001", data.clone()).await;
        assert!(matches!(outcome, DispatchOutcome::Sent { chunks: 3, bytes: 2500 }));

        let frames = decode_all(&transport.sent());
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(|f| f.data.len()).collect::<Vec<_>>(),
            vec![1024, 1024, 452]
        );
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.filename, "20241208_140309_45_frame000001.bin");
            assert_eq!(f.kind(), Ok(ContentKind::Binary));
            assert_eq!(f.sequence, i as u32);
            assert_eq!(f.is_last, i == 2);
        }
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.data.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_sends_one_terminal_frame() {
        let transport = MockTransport::new([Script::Succeed]);
        let dispatcher = ready_dispatcher(&transport, 1024).await;

        let outcome = dispatcher.send_metadata("empty", Bytes::new()).await;
        assert!(matches!(outcome, DispatchOutcome::Sent { chunks: 1, bytes: 0 }));
        let frames = decode_all(&transport.sent());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_last);
        assert!(frames[0].data.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_aborts_rest_of_payload() {
        let transport = MockTransport::with_send_limit([Script::Succeed], 2);
        let dispatcher = ready_dispatcher(&transport, 100).await;

        let outcome = dispatcher.send_image("frame", vec![0u8; 450]).await;
        match outcome {
            DispatchOutcome::Aborted { sent_chunks, total_chunks, error } => {
                assert_eq!(sent_chunks, 2);
                assert_eq!(total_chunks, 5);
                assert!(matches!(error, TransportError::ConnectionClosed));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlong_filename_is_rejected() {
        let transport = MockTransport::new([Script::Succeed]);
        let dispatcher = ready_dispatcher(&transport, 1024).await;

        let name = "n".repeat(300);
        let outcome = dispatcher.send_metadata(&name, "a,b\n").await;
        assert!(matches!(outcome, DispatchOutcome::Rejected));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_payloads_do_not_interleave() {
        let transport = MockTransport::new([Script::Succeed]);
        let dispatcher = ready_dispatcher(&transport, 10).await;

        let a = dispatcher.clone();
        let b = dispatcher.clone();
        let (ra, rb) = tokio::join!(
            async move { a.send_binary("a", vec![1u8; 50]).await },
            async move { b.send_binary("b", vec![2u8; 50]).await },
        );
        assert!(ra.is_sent() && rb.is_sent());

        let frames = decode_all(&transport.sent());
        assert_eq!(frames.len(), 10);
        let first = frames[0].filename.clone();
        assert!(frames[..5].iter().all(|f| f.filename == first));
        assert!(frames[5..].iter().all(|f| f.filename != first));
    }

    #[test]
    fn extension_is_appended_once() {
        assert_eq!(with_extension("frame", ContentKind::Image), "frame.jpg");
        assert_eq!(with_extension("frame.jpg", ContentKind::Image), "frame.jpg");
        assert_eq!(with_extension("frame.JPG", ContentKind::Image), "frame.JPG");
        assert_eq!(with_extension("imu_20241208_140309", ContentKind::Metadata), "imu_20241208_140309.csv");
        assert_eq!(with_extension("depth.csv", ContentKind::Binary), "depth.csv.bin");
    }
}
