use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::errors::ConfigError;
use crate::types::Endpoint;

/// Sender-side link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Used when no endpoint has been persisted yet.
    #[serde(alias = "defaultEndpoint")]
    pub default_endpoint: Endpoint,
    #[serde(alias = "chunkSize")]
    pub chunk_size: usize,
    #[serde(alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,
    /// Wait between a successful connect and accepting sends.
    #[serde(alias = "settleDelayMs")]
    pub settle_delay_ms: u64,
    /// Capacity of the producer → dispatcher queue.
    #[serde(alias = "queueCapacity")]
    pub queue_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_endpoint: Endpoint::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_ms: 3_000,
            settle_delay_ms: 200,
            queue_capacity: 64,
        }
    }
}

impl LinkConfig {
    /// Defaults overridden by `DEPTHLINK_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `DEPTHLINK_*` key. Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(host) = lookup("DEPTHLINK_HOST") {
            match Endpoint::new(host, cfg.default_endpoint.port) {
                Ok(ep) => cfg.default_endpoint = ep,
                Err(e) => warn!("Ignoring DEPTHLINK_HOST: {}", e),
            }
        }
        if let Some(port) = lookup("DEPTHLINK_PORT") {
            match Endpoint::parse(&cfg.default_endpoint.host, &port) {
                Ok(ep) => cfg.default_endpoint = ep,
                Err(e) => warn!("Ignoring DEPTHLINK_PORT: {}", e),
            }
        }
        parse_into(&lookup, "DEPTHLINK_CHUNK_SIZE", &mut cfg.chunk_size);
        parse_into(&lookup, "DEPTHLINK_CONNECT_TIMEOUT_MS", &mut cfg.connect_timeout_ms);
        parse_into(&lookup, "DEPTHLINK_SETTLE_MS", &mut cfg.settle_delay_ms);
        parse_into(&lookup, "DEPTHLINK_QUEUE_CAPACITY", &mut cfg.queue_capacity);

        cfg
    }

    pub fn chunk_size(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.chunk_size).ok_or(ConfigError::InvalidChunkSize)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!("Ignoring {}={:?}: not a valid number", key, raw),
        }
    }
}
