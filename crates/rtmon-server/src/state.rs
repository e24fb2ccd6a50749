use crate::config::{Backend, ServerConfig};
use crate::service::MetricService;
use anyhow::Context;
use rtmon_common::ConnRetrier;
use rtmon_storage::{DbStorage, FileSyncer, MemStorage, MetricsRepository};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: MetricService,
    /// Shared HMAC key; `None` turns signature checks off.
    pub key: Option<Arc<[u8]>>,
}

impl AppState {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self {
            service: MetricService::new(repo),
            key: None,
        }
    }

    pub fn with_key(mut self, key: Option<&str>) -> Self {
        self.key = key.filter(|k| !k.is_empty()).map(|k| Arc::from(k.as_bytes()));
        self
    }
}

/// Opens the repository selected by `config`.
///
/// Any failure here (unopenable or corrupt snapshot, first database
/// connection) is fatal for startup.
pub async fn open_repository(config: &ServerConfig) -> anyhow::Result<Arc<dyn MetricsRepository>> {
    match config.backend() {
        Backend::Database { dsn } => {
            tracing::info!("Using relational storage");
            let store = DbStorage::connect(&dsn, ConnRetrier::new(config.retry))
                .await
                .context("connecting to database")?;
            Ok(Arc::new(store))
        }
        Backend::File {
            path,
            mode,
            restore,
        } => {
            tracing::info!(path = %path, ?mode, restore, "Using file-backed storage");
            let syncer = FileSyncer::open(&path, mode, restore)
                .await
                .with_context(|| format!("opening snapshot {path}"))?;
            Ok(syncer)
        }
        Backend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(MemStorage::new()))
        }
    }
}
