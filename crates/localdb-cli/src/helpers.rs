//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, configuration resolution and JSON
//! argument parsing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use localdb_store::StoreConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configured data directory.
pub const DATA_DIR_ENV: &str = "LOCALDB_DATA_DIR";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Build the store configuration.
///
/// Precedence, lowest first: built-in defaults, the TOML file, the
/// environment directory, the command-line directory.
pub fn resolve_config(
    config_path: Option<&Path>,
    env_data_dir: Option<PathBuf>,
    flag_data_dir: Option<PathBuf>,
) -> Result<StoreConfig> {
    let mut config = match config_path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };

    if let Some(dir) = env_data_dir {
        debug!(dir = %dir.display(), "data dir from environment");
        config.data_dir = dir;
    }
    if let Some(dir) = flag_data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

/// Read [`DATA_DIR_ENV`], treating an empty value as unset.
pub fn env_data_dir() -> Option<PathBuf> {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Parse a JSON argument, naming the argument in the error.
pub fn parse_json(what: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON: {raw}"))
}
