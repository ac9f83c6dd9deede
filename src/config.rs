//! Store configuration
//!
//! Configuration can be built in code, through [`StoreBuilder`](crate::StoreBuilder),
//! or loaded from TOML:
//!
//! ```toml
//! block_size = 65536
//! max_children = 50
//! provider_version = 3
//! strict_value_types = true
//! ```
//!
//! Missing keys take their default values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracestate_core::{Error, Result, Timestamp};
use tracestate_durability::history_tree::NodeLayout;
use tracestate_durability::TreeConfig;

/// Smallest accepted block size
pub const MIN_BLOCK_SIZE: u32 = 4096;

/// Default node block size (64 KiB)
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

/// Default maximum children per core node
pub const DEFAULT_MAX_CHILDREN: u32 = 50;

/// Default number of decoded nodes kept in memory
pub const DEFAULT_NODE_CACHE_CAPACITY: usize = 256;

/// Settings of one state history store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Size of one history tree node in bytes
    pub block_size: u32,
    /// Maximum children per core node
    pub max_children: u32,
    /// Version of the state provider; a reopened file must match it
    pub provider_version: u32,
    /// Earliest time the store covers
    pub start_time: Timestamp,
    /// Reject attribute type changes at write time
    pub strict_value_types: bool,
    /// Number of decoded history nodes kept in memory
    pub node_cache_capacity: usize,
    /// Store identifier; a random UUID when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version: 0,
            start_time: 0,
            strict_value_types: false,
            node_cache_capacity: DEFAULT_NODE_CACHE_CAPACITY,
            ssid: None,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on malformed TOML or an invalid layout.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Check the node layout
    ///
    /// The block size must be at least [`MIN_BLOCK_SIZE`] and hold a core
    /// node with `max_children` child entries plus one interval;
    /// `max_children` must be at least 2.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "block size {} is below the minimum of {}",
                self.block_size, MIN_BLOCK_SIZE
            )));
        }
        NodeLayout {
            block_size: self.block_size as usize,
            max_children: self.max_children as usize,
        }
        .validate()
    }

    /// History tree settings for a file at `path`
    pub fn tree_config(&self, path: impl Into<PathBuf>) -> TreeConfig {
        TreeConfig {
            block_size: self.block_size,
            max_children: self.max_children,
            provider_version: self.provider_version,
            node_cache_capacity: self.node_cache_capacity,
            ..TreeConfig::new(path, self.start_time)
        }
    }
}
