use anyhow::{bail, Context};
use rtmon_common::retry::duration_secs;
use rtmon_common::RetryPolicy;
use rtmon_storage::syncer::SyncMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Snapshot period; zero flushes after every update.
    #[serde(default = "default_store_interval", with = "duration_secs")]
    pub store_interval: Duration,
    /// Snapshot file; empty disables file persistence.
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// Relational store DSN; takes precedence over the snapshot file when set.
    #[serde(default)]
    pub database_dsn: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// HMAC key for `HashSHA256` request checks and response signatures.
    #[serde(default)]
    pub key: String,
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_file_storage_path() -> String {
    "/tmp/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: String::new(),
            retry: RetryPolicy::default(),
            key: String::new(),
        }
    }
}

/// Which repository the server runs on.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Database { dsn: String },
    File { path: String, mode: SyncMode, restore: bool },
    Memory,
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` if it exists, falls back to defaults otherwise, then
    /// applies environment overrides.
    pub fn resolve(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path).with_context(|| format!("reading {path}"))?
        } else {
            tracing::info!(path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overrides fields from `ADDRESS`, `STORE_INTERVAL` (seconds),
    /// `FILE_STORAGE_PATH`, `RESTORE`, `DATABASE_DSN` and `KEY`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("ADDRESS") {
            self.address = address;
        }
        if let Some(v) = lookup("STORE_INTERVAL") {
            let secs: f64 = v
                .trim()
                .parse()
                .with_context(|| format!("STORE_INTERVAL: invalid value '{v}'"))?;
            if !secs.is_finite() || secs < 0.0 {
                bail!("STORE_INTERVAL: must be a non-negative number of seconds");
            }
            self.store_interval = Duration::from_secs_f64(secs);
        }
        if let Some(path) = lookup("FILE_STORAGE_PATH") {
            self.file_storage_path = path;
        }
        if let Some(v) = lookup("RESTORE") {
            self.restore = v
                .trim()
                .parse()
                .with_context(|| format!("RESTORE: invalid value '{v}'"))?;
        }
        if let Some(dsn) = lookup("DATABASE_DSN") {
            self.database_dsn = dsn;
        }
        if let Some(key) = lookup("KEY") {
            self.key = key;
        }
        Ok(())
    }

    pub fn signing_key(&self) -> Option<&str> {
        Some(self.key.as_str()).filter(|k| !k.is_empty())
    }

    pub fn backend(&self) -> Backend {
        if !self.database_dsn.trim().is_empty() {
            Backend::Database {
                dsn: self.database_dsn.trim().to_string(),
            }
        } else if !self.file_storage_path.trim().is_empty() {
            Backend::File {
                path: self.file_storage_path.trim().to_string(),
                mode: SyncMode::from_interval(self.store_interval),
                restore: self.restore,
            }
        } else {
            Backend::Memory
        }
    }
}
