//! TOML engine configuration.
//!
//! ```toml
//! [store]
//! kind = "journal"
//! path = "/var/lib/penumbra/graph.journal"
//! sync = true
//!
//! [visibility]
//! cache_capacity = 1024
//!
//! [history]
//! strict_invariants = true
//! snapshot_markers = "on_change"
//! default_limit = 100
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::security::DEFAULT_VISIBILITY_CACHE_CAPACITY;
use crate::types::PenumbraError;
use crate::write::SnapshotMarkers;

/// Whole engine configuration file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Backend selection.
    pub store: StoreConfig,
    /// Visibility evaluator tuning.
    pub visibility: VisibilityConfig,
    /// Replay and history behaviour.
    pub history: HistoryConfig,
}

/// `[store]` section.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Registered store kind, `memory` or `journal` out of the box.
    pub kind: String,
    /// Journal file for file-backed stores.
    pub path: Option<PathBuf>,
    /// Sync each appended batch to disk.
    pub sync: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: "memory".into(),
            path: None,
            sync: true,
        }
    }
}

/// `[visibility]` section.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisibilityConfig {
    /// Parsed-expression cache entries.
    pub cache_capacity: usize,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_VISIBILITY_CACHE_CAPACITY,
        }
    }
}

/// `[history]` section.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// Fail reads whose log contains writes after a delete without re-create.
    pub strict_invariants: bool,
    /// When writers emit element snapshot markers.
    pub snapshot_markers: SnapshotMarkers,
    /// Page size used by the CLI when `--limit` is absent.
    pub default_limit: Option<usize>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            strict_invariants: true,
            snapshot_markers: SnapshotMarkers::default(),
            default_limit: None,
        }
    }
}

impl EngineConfig {
    /// Loads `explicit`, or the default path; a missing file yields defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit.or_else(default_config_path) {
            Some(path) if path.exists() => Self::read(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Reads and parses one config file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Failures while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`EngineConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

impl From<ConfigError> for PenumbraError {
    fn from(err: ConfigError) -> Self {
        PenumbraError::Config(err.to_string())
    }
}

/// `<config dir>/penumbra/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("penumbra").join("config.toml"))
}
