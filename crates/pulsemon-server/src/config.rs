use anyhow::{bail, Context};
use pulsemon_storage::backend::StorageSettings;
use pulsemon_storage::mirror::FlushPolicy;
use pulsemon_common::retry::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the snapshot file inside `file_storage_path`.
pub const SNAPSHOT_FILE: &str = "metrics.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    #[serde(default = "default_address")]
    pub address: String,
    /// Seconds between snapshot flushes. `0` writes the file on every update.
    #[serde(default)]
    pub store_interval_secs: u64,
    /// Directory holding the snapshot file. Empty disables file storage.
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: Option<String>,
    /// Load the snapshot file into memory at startup.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// PostgreSQL DSN. Takes precedence over file storage when set.
    #[serde(default)]
    pub database_dsn: Option<String>,
    /// Shared secret for `HashSHA256` request verification and response signing.
    #[serde(default)]
    pub hash_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_file_storage_path() -> Option<String> {
    Some("tmp".to_string())
}

fn default_restore() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    10
}

fn default_retry_delays() -> Vec<u64> {
    vec![1000, 3000, 5000]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval_secs: 0,
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: None,
            hash_key: None,
            request_timeout_secs: default_request_timeout(),
            retry_delays_ms: default_retry_delays(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` when given. Without an explicit path the default file is
    /// used if it exists, otherwise built-in defaults apply.
    pub fn resolve(path: Option<&str>, default_path: &str) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path).with_context(|| format!("loading {path}")),
            None if Path::new(default_path).exists() => Self::load(default_path),
            None => Ok(Self::default()),
        }
    }

    /// Applies `ADDRESS`, `STORE_INTERVAL`, `FILE_STORAGE_PATH`, `RESTORE`,
    /// `DATABASE_DSN` and `KEY` overrides.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("ADDRESS") {
            self.address = address;
        }
        if let Some(v) = lookup("STORE_INTERVAL") {
            self.store_interval_secs = v.parse().context("STORE_INTERVAL")?;
        }
        if let Some(path) = lookup("FILE_STORAGE_PATH") {
            self.file_storage_path = Some(path);
        }
        if let Some(v) = lookup("RESTORE") {
            self.restore = v.parse().context("RESTORE")?;
        }
        if let Some(dsn) = lookup("DATABASE_DSN") {
            self.database_dsn = Some(dsn);
        }
        if let Some(key) = lookup("KEY") {
            self.hash_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address.trim().is_empty() {
            bail!("address must not be empty");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        Ok(())
    }

    /// Full path of the snapshot file, if file storage is enabled.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        non_empty(&self.file_storage_path).map(|dir| Path::new(dir).join(SNAPSHOT_FILE))
    }

    pub fn storage_settings(&self) -> StorageSettings {
        StorageSettings {
            database_dsn: non_empty(&self.database_dsn).map(str::to_string),
            file_path: self.snapshot_path(),
            restore: self.restore,
            flush: Some(FlushPolicy::from_secs(self.store_interval_secs)),
            retry: RetryPolicy::from_millis(&self.retry_delays_ms),
        }
    }
}
