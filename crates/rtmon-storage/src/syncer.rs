use crate::error::{Result, StorageError};
use crate::memory::MemStorage;
use crate::snapshot::SnapshotFile;
use crate::MetricsRepository;
use async_trait::async_trait;
use rtmon_common::Metric;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// When snapshots are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Flush after every successful update.
    Synchronous,
    /// Flush on a fixed period, only if something changed since the last flush.
    Periodic(Duration),
}

impl SyncMode {
    /// A zero interval selects synchronous mode.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            SyncMode::Synchronous
        } else {
            SyncMode::Periodic(interval)
        }
    }
}

/// In-memory repository mirrored to a JSON snapshot file.
///
/// Flushes are serialized through the file lock; the map snapshot they write
/// is taken under the map's own lock, so every snapshot is a consistent view.
pub struct FileSyncer {
    store: MemStorage,
    file: Mutex<SnapshotFile>,
    mode: SyncMode,
    dirty: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<Result<()>>>>,
}

impl FileSyncer {
    /// Opens the snapshot, restores it when `restore` is set, and starts the
    /// background flusher in periodic mode.
    ///
    /// A snapshot that cannot be decoded is fatal; an empty one is not.
    pub async fn open(path: impl AsRef<Path>, mode: SyncMode, restore: bool) -> Result<Arc<Self>> {
        let file = SnapshotFile::open(path)?;
        let store = MemStorage::new();
        if restore {
            let metrics = file.read().await?;
            tracing::info!(
                path = %file.path().display(),
                count = metrics.len(),
                "Restored metrics from snapshot"
            );
            store.load(metrics)?;
        }

        let syncer = Arc::new(Self {
            store,
            file: Mutex::new(file),
            mode,
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            worker: std::sync::Mutex::new(None),
        });

        if let SyncMode::Periodic(every) = mode {
            let handle = tokio::spawn(Arc::clone(&syncer).run_periodic(every));
            *syncer.lock_worker() = Some(handle);
        }
        Ok(syncer)
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Writes the current map to disk. A no-op once the file is closed.
    pub async fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        if file.is_closed() {
            tracing::debug!("Snapshot file closed, flush skipped");
            return Ok(());
        }
        file.write(&self.store.snapshot()).await
    }

    /// Stops the background flusher, performs a final flush, and closes the
    /// file. Only the first call does anything.
    ///
    /// An I/O error that stopped the background flusher is reported here.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();

        let worker = self.lock_worker().take();
        let background = match worker {
            Some(handle) => match handle.await {
                Ok(res) => res,
                Err(e) => Err(StorageError::Other(format!("snapshot task failed: {e}"))),
            },
            None => Ok(()),
        };

        let mut file = self.file.lock().await;
        let flushed = file.write(&self.store.snapshot()).await;
        file.close()?;
        tracing::info!(path = %file.path().display(), "Snapshot file closed");

        background?;
        flushed
    }

    async fn after_update(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.mode {
            SyncMode::Synchronous => self.flush().await,
            SyncMode::Periodic(_) => {
                self.dirty.store(true, Ordering::Release);
                Ok(())
            }
        }
    }

    async fn run_periodic(self: Arc<Self>, every: Duration) -> Result<()> {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if self.dirty.swap(false, Ordering::AcqRel) {
                        if let Err(e) = self.flush().await {
                            tracing::error!(error = %e, "Periodic snapshot failed, stopping flusher");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<Result<()>>>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MetricsRepository for FileSyncer {
    async fn update_gauge(&self, id: &str, value: f64) -> Result<()> {
        self.store.update_gauge(id, value).await?;
        self.after_update().await
    }

    async fn update_counter(&self, id: &str, delta: i64) -> Result<()> {
        self.store.update_counter(id, delta).await?;
        self.after_update().await
    }

    async fn update_list(&self, metrics: &[Metric]) -> Result<()> {
        self.store.update_list(metrics).await?;
        self.after_update().await
    }

    async fn get(&self, id: &str) -> Result<Metric> {
        self.store.get(id).await
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        self.store.get_all().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.close().await
    }
}
