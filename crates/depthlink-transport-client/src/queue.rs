//! Producer → dispatcher hand-off.
//!
//! Capture callbacks must not wait on the network, so they push payloads
//! into a bounded channel and a single drain task feeds the [`Dispatcher`]
//! in FIFO order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use depthlink_core::Payload;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::dispatcher::{DispatchOutcome, Dispatcher};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The queue is at capacity; the payload is handed back.
    #[error("payload queue is full")]
    QueueFull(Payload),

    #[error("payload queue is closed")]
    Closed(Payload),
}

impl SubmitError {
    pub fn into_payload(self) -> Payload {
        match self {
            Self::QueueFull(p) | Self::Closed(p) => p,
        }
    }
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub sent:              u64,
    pub dropped_not_ready: u64,
    pub rejected:          u64,
    pub aborted:           u64,
}

#[derive(Default)]
struct Counters {
    sent:              AtomicU64,
    dropped_not_ready: AtomicU64,
    rejected:          AtomicU64,
    aborted:           AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Sent { .. } => &self.sent,
            DispatchOutcome::NotReady => &self.dropped_not_ready,
            DispatchOutcome::Rejected => &self.rejected,
            DispatchOutcome::Aborted { .. } => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            sent:              self.sent.load(Ordering::Relaxed),
            dropped_not_ready: self.dropped_not_ready.load(Ordering::Relaxed),
            rejected:          self.rejected.load(Ordering::Relaxed),
            aborted:           self.aborted.load(Ordering::Relaxed),
        }
    }
}

// ── PayloadSender ─────────────────────────────────────────────────────────────

/// Producer-side handle. Cheap to clone; the drain task stops once every
/// clone is dropped.
#[derive(Clone)]
pub struct PayloadSender {
    tx: mpsc::Sender<Payload>,
    counters: Arc<Counters>,
}

impl PayloadSender {
    /// Enqueue without waiting.
    pub fn try_submit(&self, payload: Payload) -> Result<(), SubmitError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(p) => SubmitError::QueueFull(p),
            mpsc::error::TrySendError::Closed(p) => SubmitError::Closed(p),
        })
    }

    /// Enqueue, waiting for room.
    pub async fn submit(&self, payload: Payload) -> Result<(), SubmitError> {
        self.tx
            .send(payload)
            .await
            .map_err(|e| SubmitError::Closed(e.0))
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

// ── PayloadQueue ──────────────────────────────────────────────────────────────

/// Drain side of the queue, owned by its task.
pub struct PayloadQueue {
    rx: mpsc::Receiver<Payload>,
    dispatcher: Dispatcher,
    counters: Arc<Counters>,
}

impl PayloadQueue {
    /// Spawn the drain task. The handle resolves to the final counters once
    /// every [`PayloadSender`] is gone and the backlog is flushed.
    pub fn spawn(dispatcher: Dispatcher, capacity: usize) -> (PayloadSender, JoinHandle<QueueStats>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let queue = Self {
            rx,
            dispatcher,
            counters: Arc::clone(&counters),
        };
        let handle = tokio::spawn(queue.run());
        (PayloadSender { tx, counters }, handle)
    }

    async fn run(mut self) -> QueueStats {
        while let Some(payload) = self.rx.recv().await {
            let outcome = self.dispatcher.send_payload(&payload).await;
            self.counters.record(&outcome);
        }
        let stats = self.counters.snapshot();
        debug!("Payload queue drained: {:?}", stats);
        info!(
            "Payload queue closed (sent={} not_ready={} rejected={} aborted={})",
            stats.sent, stats.dropped_not_ready, stats.rejected, stats.aborted
        );
        stats
    }
}
