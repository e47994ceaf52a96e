//! Daemon configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store::{DEFAULT_MAX_ANCHORS, DEFAULT_MAX_PATCHES};
use crate::watch::DEFAULT_MAX_WATCHERS;
use crate::wire::DEFAULT_PORT;

/// Default data directory for the file-backed store.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nine-scrolls")
}

fn default_listen() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_true() -> bool {
    true
}

fn default_max_patches() -> usize {
    DEFAULT_MAX_PATCHES
}

fn default_max_anchors() -> usize {
    DEFAULT_MAX_ANCHORS
}

fn default_max_watchers() -> usize {
    DEFAULT_MAX_WATCHERS
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address for the wire protocol
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Data directory for scroll files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Serve from RAM instead of the filesystem
    #[serde(default)]
    pub memory: bool,

    /// Record patch history per write
    #[serde(default = "default_true")]
    pub history: bool,

    /// Patch ring size per key
    #[serde(default = "default_max_patches")]
    pub max_patches: usize,

    /// Anchor ring size per key
    #[serde(default = "default_max_anchors")]
    pub max_anchors: usize,

    /// Watcher cap per namespace
    #[serde(default = "default_max_watchers")]
    pub max_watchers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            memory: false,
            history: true,
            max_patches: DEFAULT_MAX_PATCHES,
            max_anchors: DEFAULT_MAX_ANCHORS,
            max_watchers: DEFAULT_MAX_WATCHERS,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
