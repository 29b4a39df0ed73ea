use std::path::{Path, PathBuf};

use anyhow::Context;
use depthlink_core::wire::DEFAULT_MAX_CHUNK_LEN;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    #[serde(alias = "listenAddr")]
    pub listen_addr: String,
    /// Root of the event folders. `None` keeps files in memory only
    /// (they are still delivered on the files channel).
    #[serde(alias = "outputDir")]
    pub output_dir: Option<PathBuf>,
    /// Largest chunk accepted before the connection is dropped.
    #[serde(alias = "maxChunkLen")]
    pub max_chunk_len: u32,
    /// Write `received <filename>\n` back to the sender per completed file.
    #[serde(alias = "ackCompleted")]
    pub ack_completed: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_addr:   "0.0.0.0:5678".to_owned(),
            output_dir:    Some(PathBuf::from("uploads")),
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
            ack_completed: false,
        }
    }
}

impl ReceiverConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Reading receiver config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Parsing receiver config {}", path.display()))
    }

    /// Defaults overridden by `DEPTHLINK_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().merge_lookup(|key| std::env::var(key).ok())
    }

    /// Apply `DEPTHLINK_LISTEN`, `DEPTHLINK_OUTPUT_DIR`,
    /// `DEPTHLINK_MAX_CHUNK_LEN` and `DEPTHLINK_ACK` from `lookup`.
    pub fn merge_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup("DEPTHLINK_LISTEN") {
            self.listen_addr = addr;
        }
        if let Some(dir) = lookup("DEPTHLINK_OUTPUT_DIR") {
            self.output_dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
        }
        if let Some(raw) = lookup("DEPTHLINK_MAX_CHUNK_LEN") {
            match raw.trim().parse() {
                Ok(v) => self.max_chunk_len = v,
                Err(_) => warn!("Ignoring DEPTHLINK_MAX_CHUNK_LEN={:?}: not a valid number", raw),
            }
        }
        if let Some(raw) = lookup("DEPTHLINK_ACK") {
            self.ack_completed = matches!(raw.trim(), "1" | "true" | "yes" | "on");
        }
        self
    }
}
