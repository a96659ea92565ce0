//! Store configuration.
//!
//! [`StoreConfig`] is plain serde data so it can come from a TOML file,
//! from code, or from both (file first, then field overrides).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Name of the collection every opened store is guaranteed to contain.
pub const DEFAULT_COLLECTION: &str = "default";

/// Runtime configuration shared by every store opened with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one `<name>.db` file per store.
    pub data_dir: PathBuf,
    /// Name of the collection created on first open.
    pub default_collection: String,
    /// Keep stores in memory instead of on disk. Data is lost on close.
    pub in_memory: bool,
    /// How long a writer waits on a locked database file, in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            default_collection: DEFAULT_COLLECTION.to_string(),
            in_memory: false,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    /// Configuration for throwaway in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    /// Configuration rooted at `data_dir`, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading store config");
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// On-disk location of the store called `name`.
    pub fn store_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.db"))
    }

    fn validate(&self) -> StoreResult<()> {
        if self.default_collection.trim().is_empty() {
            return Err(StoreError::Config(
                "default_collection must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
