//! Agent configuration.
//!
//! Loaded from a JSON file whose path comes from the `CONFIG_FILE_PATH`
//! environment variable, falling back to `/etc/conf/config.json`. Exactly one
//! store backend is selected at startup: `store.file` wins over
//! `store.database`, and when both are absent the agent keeps batches in
//! memory only.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_FILE_PATH_ENV: &str = "CONFIG_FILE_PATH";

/// Path used when `CONFIG_FILE_PATH` is not set.
pub const DEFAULT_CONFIG_FILE_PATH: &str = "/etc/conf/config.json";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub sp_endpoint: SpEndpoint,
    #[serde(default)]
    pub advanced: Advanced,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
}

/// The remote analytics endpoint batches are shipped to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpEndpoint {
    pub url: String,
    pub send_interval_seconds: u64,
}

/// Buffering and batching knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Advanced {
    pub buffer_timeout_seconds: u64,
    pub max_records_for_single_write: usize,
    pub buffer_size_factor: usize,
}

impl Default for Advanced {
    fn default() -> Self {
        Self {
            buffer_timeout_seconds: 60,
            max_records_for_single_write: 100,
            buffer_size_factor: 100,
        }
    }
}

/// Store backend selection. `file` takes precedence over `database`; neither
/// means in-memory persistence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub file: Option<FileStoreConfig>,
    pub database: Option<DatabaseStoreConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStoreConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStoreConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub username: String,
    pub password: String,
    pub name: String,
}

/// Policy-plane listener options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixerConfig {
    pub tls: Option<TlsConfig>,
}

/// Paths to the mutual-TLS material for the ingestion listener. All three
/// must be present and readable for TLS to be enabled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    pub ca_certificate: PathBuf,
}

impl Config {
    /// Load the configuration from `CONFIG_FILE_PATH`, or the default path
    /// when the variable is unset or empty.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_FILE_PATH_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE_PATH.to_string());
        Self::from_file(Path::new(&path))
    }

    /// Load and validate the configuration from an explicit path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(file) = &config.store.file {
            if file.path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyStorePath);
            }
        }
        Ok(config)
    }

    /// Capacity of the ingestion buffer and of the in-memory store, in
    /// records and batches respectively.
    pub fn buffer_capacity(&self) -> usize {
        self.advanced.max_records_for_single_write * self.advanced.buffer_size_factor
    }

    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_secs(self.advanced.buffer_timeout_seconds)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.sp_endpoint.send_interval_seconds)
    }
}
