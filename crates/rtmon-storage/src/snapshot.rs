use crate::error::{Result, StorageError};
use rtmon_common::Metric;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// JSON snapshot of the metrics map on disk.
///
/// Writes go to `<path>.tmp` first and are renamed over `<path>` once synced,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    tmp_path: PathBuf,
    closed: bool,
}

impl SnapshotFile {
    /// Opens the snapshot at `path`, creating an empty file if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Ok(Self {
            path,
            tmp_path: PathBuf::from(tmp),
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Decodes the whole snapshot. An empty file is a fresh start.
    pub async fn read(&self) -> Result<Vec<Metric>> {
        let bytes = tokio::fs::read(&self.path).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let metrics: Vec<Metric> =
            serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e.to_string()))?;
        for m in &metrics {
            m.validate().map_err(|e| self.corrupt(e.to_string()))?;
        }
        Ok(metrics)
    }

    /// Replaces the snapshot with `metrics`.
    pub async fn write(&mut self, metrics: &[Metric]) -> Result<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        let bytes = serde_json::to_vec(metrics)?;
        let mut tmp = tokio::fs::File::create(&self.tmp_path).await?;
        tmp.write_all(&bytes).await?;
        tmp.sync_all().await?;
        drop(tmp);
        tokio::fs::rename(&self.tmp_path, &self.path).await?;
        tracing::debug!(path = %self.path.display(), count = metrics.len(), "Snapshot written");
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        self.closed = true;
        Ok(())
    }

    fn corrupt(&self, reason: String) -> StorageError {
        StorageError::Corrupt {
            path: self.path.display().to_string(),
            reason,
        }
    }
}
