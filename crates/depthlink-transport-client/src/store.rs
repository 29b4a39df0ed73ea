//! Persistence of the last endpoint the user asked for.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use depthlink_core::{ConfigError, Endpoint};
use tracing::{debug, warn};

/// Where the selected endpoint survives restarts.
pub trait EndpointStore: Send + Sync {
    /// Last saved endpoint, or `None` if nothing usable was saved.
    fn load(&self) -> Option<Endpoint>;

    fn save(&self, endpoint: &Endpoint) -> Result<(), ConfigError>;
}

// ── JsonFileStore ─────────────────────────────────────────────────────────────

/// Stores the endpoint as a small JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/depthlink/endpoint.json`, or `None` when the platform
    /// has no config directory.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::at(dir.join("depthlink").join("endpoint.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EndpointStore for JsonFileStore {
    fn load(&self) -> Option<Endpoint> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No saved endpoint at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<Endpoint>(&raw).map(Endpoint::validate) {
            Ok(Ok(endpoint)) => Some(endpoint),
            Ok(Err(e)) => {
                warn!("Saved endpoint in {} is invalid: {}", self.path.display(), e);
                None
            }
            Err(e) => {
                warn!("Saved endpoint in {} is corrupt: {}", self.path.display(), e);
                None
            }
        }
    }

    fn save(&self, endpoint: &Endpoint) -> Result<(), ConfigError> {
        let persist = |reason: String| ConfigError::Persist { reason };

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| persist(e.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(endpoint).map_err(|e| persist(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| persist(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| persist(e.to_string()))?;
        debug!("Saved endpoint {} to {}", endpoint, self.path.display());
        Ok(())
    }
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

/// In-process store for tests and for runs that should not touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Endpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(endpoint: Endpoint) -> Self {
        Self {
            slot: Mutex::new(Some(endpoint)),
        }
    }

    pub fn get(&self) -> Option<Endpoint> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl EndpointStore for MemoryStore {
    fn load(&self) -> Option<Endpoint> {
        self.get()
    }

    fn save(&self, endpoint: &Endpoint) -> Result<(), ConfigError> {
        *self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(endpoint.clone());
        Ok(())
    }
}
