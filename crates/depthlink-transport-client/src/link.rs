//! Connection lifecycle manager.
//!
//! ```text
//!   Disconnected ──update──► Connecting ──ok──► Connected ──settle──► ready
//!        ▲                      │                   │
//!        │                      └─err / timeout─► Failed ──update──► Connecting
//!        └──── Disconnecting ◄──────disconnect──────┘
//! ```
//!
//! An update runs the connect attempt and a timeout timer as two tasks. Both
//! finish through a [`CompletionGuard`]; taking the guard and applying the
//! state transition happen under the same lock, so the caller's completion
//! callback fires exactly once whichever task gets there first.
//!
//! Every update, disconnect and startup connect bumps the link generation.
//! Completion paths of an older generation still consume their guard (the
//! callback sees [`ConnectFailure::Superseded`]) but leave state alone.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use depthlink_core::{ConnectionState, Endpoint, LinkConfig, LinkStatus};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{Session, Transport};
use crate::store::EndpointStore;

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Failed(ConnectFailure),
}

impl ConnectOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Why an update did not end up connected. Reported for logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The socket connect failed; carries the error text.
    Refused(String),
    /// No result within the connect timeout.
    TimedOut,
    /// A later update, disconnect or shutdown replaced this attempt.
    Superseded,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused(reason) => write!(f, "connection refused: {}", reason),
            Self::TimedOut => write!(f, "connect timed out"),
            Self::Superseded => write!(f, "superseded by a newer request"),
        }
    }
}

// ── Completion guard ──────────────────────────────────────────────────────────

type Completion = Box<dyn FnOnce(ConnectOutcome) + Send + 'static>;

/// Single-assignment slot holding an update's completion callback.
/// Only taken while the link lock is held.
struct CompletionGuard {
    slot: Mutex<Option<Completion>>,
}

impl CompletionGuard {
    fn new(callback: Completion) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Some(callback)),
        })
    }

    fn take(&self) -> Option<Completion> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

// ── ConnectionManager ─────────────────────────────────────────────────────────

struct LinkInner {
    state: ConnectionState,
    ready: bool,
    endpoint: Endpoint,
    generation: u64,
    session: Option<Arc<dyn Session>>,
    /// `None` once the manager has been shut down.
    status_tx: Option<watch::Sender<LinkStatus>>,
}

impl LinkInner {
    fn publish(&self) {
        if let Some(tx) = &self.status_tx {
            tx.send_replace(LinkStatus {
                state: self.state,
                ready: self.ready,
                endpoint: self.endpoint.clone(),
            });
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.status_tx.is_some()
    }
}

struct Shared {
    inner: Mutex<LinkInner>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn EndpointStore>,
    connect_timeout: Duration,
    settle_delay: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the single link to the collector. Cheap to clone; all clones share
/// the same state.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Build a manager in `Disconnected`, using the persisted endpoint or
    /// `config.default_endpoint` when none was saved. Does not connect.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn EndpointStore>,
        config: &LinkConfig,
    ) -> Self {
        let endpoint = store.load().unwrap_or_else(|| config.default_endpoint.clone());
        info!("Link endpoint: {}", endpoint);

        let status = LinkStatus {
            state: ConnectionState::Disconnected,
            ready: false,
            endpoint: endpoint.clone(),
        };
        let (status_tx, _) = watch::channel(status);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(LinkInner {
                    state: ConnectionState::Disconnected,
                    ready: false,
                    endpoint,
                    generation: 0,
                    session: None,
                    status_tx: Some(status_tx),
                }),
                transport,
                store,
                connect_timeout: config.connect_timeout(),
                settle_delay: config.settle_delay(),
            }),
        }
    }

    // MARK: - Queries

    /// True only while connected and past the settle delay.
    pub fn is_ready(&self) -> bool {
        self.shared.lock().ready
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn endpoint(&self) -> Endpoint {
        self.shared.lock().endpoint.clone()
    }

    /// Watch every state / readiness change. After shutdown the returned
    /// receiver is already closed.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        let inner = self.shared.lock();
        match &inner.status_tx {
            Some(tx) => tx.subscribe(),
            None => {
                let (_, rx) = watch::channel(LinkStatus {
                    state: inner.state,
                    ready: inner.ready,
                    endpoint: inner.endpoint.clone(),
                });
                rx
            }
        }
    }

    /// The live session, checked against the ready flag in one lock scope.
    pub(crate) fn session_if_ready(&self) -> Option<Arc<dyn Session>> {
        let inner = self.shared.lock();
        if inner.ready && inner.state.is_connected() {
            inner.session.clone()
        } else {
            None
        }
    }

    // MARK: - Update

    /// Switch to `endpoint` and wait for the outcome.
    pub async fn update_connection(&self, endpoint: Endpoint) -> ConnectOutcome {
        let (tx, rx) = oneshot::channel();
        self.begin_update(endpoint, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await
            .unwrap_or(ConnectOutcome::Failed(ConnectFailure::Superseded))
    }

    /// Tear down the current link, persist `endpoint` and start connecting
    /// to it. `on_complete` runs exactly once, on a runtime worker.
    pub fn begin_update<F>(&self, endpoint: Endpoint, on_complete: F)
    where
        F: FnOnce(ConnectOutcome) + Send + 'static,
    {
        let (generation, previous) = {
            let mut inner = self.shared.lock();
            if inner.status_tx.is_none() {
                drop(inner);
                warn!("Update to {} ignored: link is shut down", endpoint);
                on_complete(ConnectOutcome::Failed(ConnectFailure::Superseded));
                return;
            }
            inner.generation += 1;
            inner.ready = false;
            inner.state = ConnectionState::Connecting;
            inner.endpoint = endpoint.clone();
            let previous = inner.session.take();
            inner.publish();
            (inner.generation, previous)
        };
        if let Err(e) = self.shared.store.save(&endpoint) {
            warn!("Could not persist endpoint {}: {}", endpoint, e);
        }
        info!("Connecting to {} (attempt {})", endpoint, generation);

        if let Some(session) = previous {
            tokio::spawn(async move { session.close().await });
        }

        let guard = CompletionGuard::new(Box::new(on_complete));
        let timer = tokio::spawn(run_timer(
            Arc::clone(&self.shared),
            generation,
            endpoint.clone(),
            Arc::clone(&guard),
        ));
        tokio::spawn(run_attempt(
            Arc::clone(&self.shared),
            generation,
            endpoint,
            guard,
            timer,
        ));
    }

    // MARK: - Startup

    /// Best-effort connect to the current endpoint with no timeout. The
    /// result is logged and applied to state; nobody is notified. Does
    /// nothing once the manager is shut down.
    pub fn connect_initial(&self) -> JoinHandle<()> {
        let (generation, endpoint, previous) = {
            let mut inner = self.shared.lock();
            if inner.status_tx.is_none() {
                drop(inner);
                debug!("Startup connect skipped: link is shut down");
                return tokio::spawn(async {});
            }
            inner.generation += 1;
            inner.ready = false;
            inner.state = ConnectionState::Connecting;
            inner.publish();
            (inner.generation, inner.endpoint.clone(), inner.session.take())
        };
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            if let Some(session) = previous {
                session.close().await;
            }
            info!("Startup connect to {}", endpoint);
            match shared.transport.connect(&endpoint).await {
                Ok(session) => {
                    let installed = {
                        let mut inner = shared.lock();
                        if inner.is_current(generation) {
                            inner.state = ConnectionState::Connected;
                            inner.session = Some(Arc::clone(&session));
                            inner.publish();
                            true
                        } else {
                            false
                        }
                    };
                    if !installed {
                        debug!("Startup connect to {} superseded; closing", endpoint);
                        session.close().await;
                        return;
                    }
                    info!("Connected to {}", endpoint);
                    if settle(&shared, generation).await {
                        info!("Link to {} ready", endpoint);
                    }
                }
                Err(e) => {
                    let mut inner = shared.lock();
                    if inner.is_current(generation) {
                        inner.state = ConnectionState::Failed;
                        inner.ready = false;
                        inner.publish();
                        drop(inner);
                        warn!("Startup connect to {} failed: {}", endpoint, e);
                    }
                }
            }
        })
    }

    // MARK: - Disconnect

    /// Clear the ready flag now, then close the socket in the background
    /// and land in `Disconnected`. Await the handle to wait for the close.
    pub fn disconnect(&self) -> JoinHandle<()> {
        let (generation, session) = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.ready = false;
            inner.state = ConnectionState::Disconnecting;
            inner.publish();
            (inner.generation, inner.session.take())
        };
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            if let Some(session) = session {
                session.close().await;
            }
            let mut inner = shared.lock();
            if inner.generation == generation {
                inner.state = ConnectionState::Disconnected;
                inner.publish();
                drop(inner);
                info!("Disconnected");
            }
        })
    }

    /// Disconnect, wait for the socket to close, and close the status
    /// channel. Later updates fail with `Superseded`.
    pub async fn shutdown(&self) {
        if let Err(e) = self.disconnect().await {
            warn!("Disconnect task failed during shutdown: {}", e);
        }
        let mut inner = self.shared.lock();
        inner.state = ConnectionState::Disconnected;
        inner.publish();
        inner.status_tx = None;
        drop(inner);
        info!("Link shut down");
    }
}

// ── Completion paths ──────────────────────────────────────────────────────────

/// Take the guard as a failure. Returns the callback and whether this
/// generation is still current (state already moved to `Failed` if so).
fn take_as_failure(
    shared: &Shared,
    generation: u64,
    guard: &CompletionGuard,
) -> Option<(Completion, bool)> {
    let mut inner = shared.lock();
    let callback = guard.take()?;
    let current = inner.is_current(generation);
    if current {
        inner.state = ConnectionState::Failed;
        inner.ready = false;
        inner.publish();
    }
    Some((callback, current))
}

async fn run_timer(
    shared: Arc<Shared>,
    generation: u64,
    endpoint: Endpoint,
    guard: Arc<CompletionGuard>,
) {
    tokio::time::sleep(shared.connect_timeout).await;

    match take_as_failure(&shared, generation, &guard) {
        Some((callback, true)) => {
            warn!(
                "Connect to {} timed out after {} ms",
                endpoint,
                shared.connect_timeout.as_millis()
            );
            callback(ConnectOutcome::Failed(ConnectFailure::TimedOut));
        }
        Some((callback, false)) => callback(ConnectOutcome::Failed(ConnectFailure::Superseded)),
        None => {}
    }
}

async fn run_attempt(
    shared: Arc<Shared>,
    generation: u64,
    endpoint: Endpoint,
    guard: Arc<CompletionGuard>,
    timer: JoinHandle<()>,
) {
    let session = match shared.transport.connect(&endpoint).await {
        Ok(session) => session,
        Err(e) => {
            match take_as_failure(&shared, generation, &guard) {
                Some((callback, current)) => {
                    timer.abort();
                    if current {
                        warn!("Connect to {} failed: {}", endpoint, e);
                        callback(ConnectOutcome::Failed(ConnectFailure::Refused(e.to_string())));
                    } else {
                        callback(ConnectOutcome::Failed(ConnectFailure::Superseded));
                    }
                }
                None => debug!("Connect to {} failed after timeout: {}", endpoint, e),
            }
            return;
        }
    };

    // Install the session only if this attempt wins the guard and is current.
    let taken = {
        let mut inner = shared.lock();
        guard.take().map(|callback| {
            let current = inner.is_current(generation);
            if current {
                inner.state = ConnectionState::Connected;
                inner.session = Some(Arc::clone(&session));
                inner.publish();
            }
            (callback, current)
        })
    };

    match taken {
        None => {
            info!("Connect to {} completed after timeout; closing", endpoint);
            session.close().await;
        }
        Some((callback, false)) => {
            timer.abort();
            session.close().await;
            callback(ConnectOutcome::Failed(ConnectFailure::Superseded));
        }
        Some((callback, true)) => {
            timer.abort();
            info!("Connected to {}", endpoint);
            if settle(&shared, generation).await {
                info!("Link to {} ready", endpoint);
                callback(ConnectOutcome::Connected);
            } else {
                callback(ConnectOutcome::Failed(ConnectFailure::Superseded));
            }
        }
    }
}

/// Wait the settle delay, then raise the ready flag if nothing replaced
/// this generation meanwhile.
async fn settle(shared: &Shared, generation: u64) -> bool {
    tokio::time::sleep(shared.settle_delay).await;

    let mut inner = shared.lock();
    if !inner.is_current(generation) || !inner.state.is_connected() {
        return false;
    }
    inner.ready = true;
    inner.publish();
    true
}
