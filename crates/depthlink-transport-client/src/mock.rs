//! Scripted transport for exercising the link and dispatcher without sockets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use depthlink_core::{Endpoint, TransportError};

use crate::session::{Session, Transport};

/// How the next `connect` call behaves.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    Succeed,
    Refuse,
    Hang,
    SucceedAfter(Duration),
    FailAfter(Duration),
}

pub(crate) struct MockTransport {
    script: Mutex<VecDeque<Script>>,
    endpoints: Mutex<Vec<Endpoint>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    sent: Arc<Mutex<Vec<Bytes>>>,
    send_limit: Option<usize>,
}

impl MockTransport {
    /// Calls beyond the end of `script` succeed immediately.
    pub(crate) fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self::build(script, None))
    }

    /// Sessions accept `limit` frames, then fail with `ConnectionClosed`.
    pub(crate) fn with_send_limit(script: impl IntoIterator<Item = Script>, limit: usize) -> Arc<Self> {
        Arc::new(Self::build(script, Some(limit)))
    }

    fn build(script: impl IntoIterator<Item = Script>, send_limit: Option<usize>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            endpoints: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            send_limit,
        }
    }

    pub(crate) fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().unwrap().clone()
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap().clone()
    }

    /// Every frame written through any session, in write order.
    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    fn open(&self) -> Arc<dyn Session> {
        let session = Arc::new(MockSession {
            sent: Arc::clone(&self.sent),
            closed: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            send_limit: self.send_limit,
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        session
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Session>, TransportError> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Succeed);
        match step {
            Script::Succeed => Ok(self.open()),
            Script::Refuse => Err(refused()),
            Script::Hang => std::future::pending().await,
            Script::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.open())
            }
            Script::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                Err(refused())
            }
        }
    }
}

fn refused() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

pub(crate) struct MockSession {
    sent: Arc<Mutex<Vec<Bytes>>>,
    closed: AtomicBool,
    writes: AtomicUsize,
    send_limit: Option<usize>,
}

impl MockSession {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        let n = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.send_limit.is_some_and(|limit| n >= limit) {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
