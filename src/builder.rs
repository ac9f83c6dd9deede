//! Store construction
//!
//! [`StoreBuilder`] is the entry point for creating a store. It picks the
//! interval backend and wires it into a [`StateSystem`].
//!
//! | Method | Backend | Files |
//! |--------|---------|-------|
//! | `build()` | history tree | new file at `path` |
//! | `build_ephemeral()` | in memory | none |
//! | `open_existing()` | history tree, read-only | existing file at `path` |

use crate::config::StoreConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracestate_core::{Error, Result, Timestamp};
use tracestate_durability::{HistoryTreeBackend, InMemoryBackend};
use tracestate_engine::StateSystem;
use tracing::info;
use uuid::Uuid;

/// Builder for state history stores
///
/// # Example
///
/// ```ignore
/// use tracestate::prelude::*;
///
/// // File-backed store
/// let ss = StoreBuilder::new()
///     .path("./kernel.ht")
///     .provider_version(3)
///     .build()?;
///
/// // Unit testing: nothing on disk
/// let ss = StoreBuilder::new().build_ephemeral()?;
///
/// // Reopen a finished store
/// let ss = StoreBuilder::new()
///     .path("./kernel.ht")
///     .provider_version(3)
///     .open_existing()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct StoreBuilder {
    path: Option<PathBuf>,
    config: StoreConfig,
}

impl StoreBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// History file location
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replace every setting with `config`
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Node block size in bytes
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Maximum children per core node
    pub fn max_children(mut self, max_children: u32) -> Self {
        self.config.max_children = max_children;
        self
    }

    /// Version of the state provider
    pub fn provider_version(mut self, version: u32) -> Self {
        self.config.provider_version = version;
        self
    }

    /// Earliest time the store covers
    pub fn start_time(mut self, start: Timestamp) -> Self {
        self.config.start_time = start;
        self
    }

    /// Reject attribute type changes at write time
    pub fn strict_value_types(mut self, strict: bool) -> Self {
        self.config.strict_value_types = strict;
        self
    }

    /// Store identifier
    pub fn ssid(mut self, ssid: impl Into<String>) -> Self {
        self.config.ssid = Some(ssid.into());
        self
    }

    fn require_path(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("no history file path set".to_string()))
    }

    fn resolve_ssid(&self) -> String {
        self.config
            .ssid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Create a store backed by a new history file
    ///
    /// # Errors
    ///
    /// `InvalidConfig` without a path or with an invalid layout, `Io` if
    /// the file cannot be created.
    pub fn build(self) -> Result<Arc<StateSystem>> {
        self.config.validate()?;
        let path = self.require_path()?;
        let ssid = self.resolve_ssid();
        let backend = HistoryTreeBackend::create(ssid.as_str(), &self.config.tree_config(path))?;
        info!("Created state history {} at {}", ssid, path.display());
        Ok(Arc::new(StateSystem::new(
            Arc::new(backend),
            self.config.strict_value_types,
        )))
    }

    /// Create a store that keeps every interval in memory
    pub fn build_ephemeral(self) -> Result<Arc<StateSystem>> {
        self.config.validate()?;
        let backend = InMemoryBackend::new(self.resolve_ssid(), self.config.start_time);
        Ok(Arc::new(StateSystem::new(
            Arc::new(backend),
            self.config.strict_value_types,
        )))
    }

    /// Reopen the finished history file at `path` read-only
    ///
    /// The configured provider version must match the one the file was
    /// built with.
    ///
    /// # Errors
    ///
    /// `Corruption` on a foreign file or provider version mismatch.
    pub fn open_existing(self) -> Result<Arc<StateSystem>> {
        let path = self.require_path()?;
        let ssid = match &self.config.ssid {
            Some(ssid) => ssid.clone(),
            None => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        };
        let backend = HistoryTreeBackend::open_existing(
            ssid,
            path,
            self.config.provider_version,
            self.config.node_cache_capacity,
        )?;
        Ok(Arc::new(StateSystem::open_existing(Arc::new(backend))?))
    }
}
