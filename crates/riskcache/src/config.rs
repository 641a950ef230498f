//! Cache configuration.
//!
//! Provides [`CacheConfig`] with defaults rooted at the platform data
//! directory, overridable from `RISKCACHE_*` environment variables.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use riskcache_core::constants::DEFAULT_DB_NAME;
use riskcache_core::types::AccessMode;

use crate::logging::LogFormat;

pub const ENV_DATA_DIR: &str = "RISKCACHE_DATA_DIR";
pub const ENV_DB_NAME: &str = "RISKCACHE_DB_NAME";
pub const ENV_READ_ONLY: &str = "RISKCACHE_READ_ONLY";
pub const ENV_LOG_LEVEL: &str = "RISKCACHE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "RISKCACHE_LOG_FORMAT";

/// Configuration for one cache session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Store directory name inside `data_dir`.
    pub db_name: String,
    pub mode: AccessMode,
    /// Log filter string (e.g. "info", "riskcache=debug").
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("riskcache");

        Self {
            data_dir,
            db_name: DEFAULT_DB_NAME.to_string(),
            mode: AccessMode::ReadOnly,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl CacheConfig {
    /// Path to the RocksDB store directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_name)
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup(ENV_DB_NAME) {
            if name.is_empty() {
                bail!("{ENV_DB_NAME} must not be empty");
            }
            cfg.db_name = name;
        }
        if let Some(flag) = lookup(ENV_READ_ONLY) {
            let read_only = parse_flag(&flag)
                .with_context(|| format!("{ENV_READ_ONLY} must be a boolean, got {flag:?}"))?;
            cfg.mode = if read_only { AccessMode::ReadOnly } else { AccessMode::Writable };
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            cfg.log_level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            cfg.log_format = format
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid {ENV_LOG_FORMAT}"))?;
        }
        Ok(cfg)
    }
}

fn parse_flag(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("unrecognized flag value"),
    }
}
