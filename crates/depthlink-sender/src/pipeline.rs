//! Sender pipeline: capture (or files on disk) → payload queue → collector.
//!
//! ```text
//! MockCapture / files ──► PayloadSender ──► PayloadQueue task ──► Dispatcher ──► TCP
//!                                                                      ▲
//!            SessionEvent (responses, close) ◄── TcpTransport ─────────┘
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use depthlink_core::{ConnectionState, ContentKind, LinkConfig, Payload};
use depthlink_transport_client::{
    ConnectionManager, Dispatcher, PayloadQueue, QueueStats, SessionEvent, SubmitError,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capture::{CaptureConfig, MockCapture};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frames to capture; `None` streams until interrupted.
    pub frames:         Option<u64>,
    pub fps:            u32,
    /// Send these files instead of running the mock capture.
    pub files:          Vec<PathBuf>,
    pub queue_capacity: usize,
    pub capture:        CaptureConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frames:         Some(30),
            fps:            10,
            files:          Vec::new(),
            queue_capacity: 64,
            capture:        CaptureConfig::default(),
        }
    }
}

// ── Readiness ─────────────────────────────────────────────────────────────────

/// Wait until the link is ready, failing fast if it ends up `Failed`.
pub async fn wait_ready(link: &ConnectionManager, limit: Duration) -> Result<()> {
    let mut status = link.subscribe();
    let wait = status.wait_for(|s| s.ready || s.state == ConnectionState::Failed);
    let reached = tokio::time::timeout(limit, wait)
        .await
        .with_context(|| format!("Link to {} not ready after {:?}", link.endpoint(), limit))?
        .context("Link status channel closed")?;
    if !reached.ready {
        bail!("Connection to {} failed", reached.endpoint);
    }
    Ok(())
}

/// How long the sender waits for the startup connect before streaming.
pub fn startup_limit(config: &LinkConfig) -> Duration {
    config
        .connect_timeout()
        .saturating_mul(2)
        .saturating_add(config.settle_delay())
}

/// Wait for the startup connect. Best-effort: a failure is logged and the
/// caller keeps streaming, with sends dropped until the link is ready.
pub async fn await_startup(link: &ConnectionManager, limit: Duration) -> bool {
    match wait_ready(link, limit).await {
        Ok(()) => true,
        Err(e) => {
            warn!("{:#}; streaming anyway, payloads are dropped until the link is ready", e);
            false
        }
    }
}

// ── Run ───────────────────────────────────────────────────────────────────────

/// Run until the capture finishes, the files are sent, or Ctrl-C.
pub async fn run(
    link: ConnectionManager,
    dispatcher: Dispatcher,
    mut events: mpsc::Receiver<SessionEvent>,
    config: PipelineConfig,
) -> Result<QueueStats> {
    let (sender, drain) = PayloadQueue::spawn(dispatcher, config.queue_capacity);
    let mut status = link.subscribe();

    if !config.files.is_empty() {
        for path in &config.files {
            let payload = load_file(path).await?;
            info!("Queueing {} ({}, {} bytes)", payload.filename, payload.kind, payload.len());
            if sender.submit(payload).await.is_err() {
                bail!("Payload queue closed");
            }
        }
    } else {
        let mut capture = MockCapture::new(config.capture.clone());
        let period = Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1)));
        let mut ticker = tokio::time::interval(period);
        info!(
            "Streaming mock capture at {} fps ({} frames)",
            config.fps,
            config.frames.map_or_else(|| "unlimited".to_owned(), |n| n.to_string())
        );

        loop {
            if config.frames.is_some_and(|n| capture.frames_taken() >= n) {
                break;
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted after {} frames", capture.frames_taken());
                    break;
                }

                _ = ticker.tick() => {
                    let payloads = capture
                        .next_frame(&chrono::Local::now())
                        .context("Encoding mock frame")?;
                    for payload in payloads {
                        match sender.try_submit(payload) {
                            Ok(()) => {}
                            Err(SubmitError::QueueFull(p)) => {
                                warn!("Queue full; dropping {}", p.filename);
                            }
                            Err(SubmitError::Closed(_)) => bail!("Payload queue closed"),
                        }
                    }
                }

                maybe_ev = events.recv() => match maybe_ev {
                    Some(ev) => on_session_event(&link, ev),
                    None => debug!("Session event channel closed"),
                },

                changed = status.changed() => {
                    if changed.is_ok() {
                        let s = status.borrow_and_update().clone();
                        info!("Link {}: {}{}", s.endpoint, s.state, if s.ready { " (ready)" } else { "" });
                    }
                }
            }
        }
        if let Some(event) = capture.event() {
            info!("Event {}: {} frames captured", event, capture.frames_taken());
        }
    }

    drop(sender);
    let stats = drain.await.context("Payload queue task panicked")?;

    // Give collector responses for the last payloads a moment to arrive.
    while let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        on_session_event(&link, ev);
    }
    Ok(stats)
}

fn on_session_event(link: &ConnectionManager, event: SessionEvent) {
    match event {
        SessionEvent::Response { peer, text } => {
            for line in text.lines().filter(|l| !l.is_empty()) {
                info!("Collector {}: {}", peer, line);
            }
        }
        SessionEvent::Closed { peer } => {
            warn!("Collector {} closed the connection", peer);
            if link.state().is_connected() {
                drop(link.disconnect());
            }
        }
    }
}

async fn load_file(path: &Path) -> Result<Payload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Reading {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no UTF-8 file name", path.display()))?
        .to_owned();
    let kind = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ContentKind::from_extension)
        .unwrap_or(ContentKind::Binary);
    Ok(Payload::new(kind, filename, data))
}
