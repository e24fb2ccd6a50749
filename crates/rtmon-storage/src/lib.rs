//! Storage layer for the rtmon aggregator.
//!
//! Three interchangeable backends implement [`MetricsRepository`]:
//!
//! - [`memory::MemStorage`]: a lock-protected map, the substrate of the others.
//! - [`syncer::FileSyncer`]: the in-memory map plus a JSON snapshot file, flushed
//!   synchronously on every update or periodically in the background.
//! - [`relational::DbStorage`]: upsert SQL through sea-orm (PostgreSQL or
//!   SQLite), with connection retries and sorted, transactional batches.

pub mod entities;
pub mod error;
pub mod memory;
pub mod relational;
pub mod snapshot;
pub mod syncer;


use async_trait::async_trait;
use rtmon_common::Metric;

pub use error::{Result, StorageError};
pub use memory::MemStorage;
pub use relational::DbStorage;
pub use snapshot::SnapshotFile;
pub use syncer::FileSyncer;

/// Persistence contract for metrics, uniform across backends.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because every HTTP handler calls into the same repository concurrently.
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Overwrites the stored value of gauge `id`, inserting it if absent.
    async fn update_gauge(&self, id: &str, value: f64) -> Result<()>;

    /// Adds `delta` to counter `id`, inserting it with `delta` if absent.
    async fn update_counter(&self, id: &str, delta: i64) -> Result<()>;

    /// Applies a batch of mixed updates with the same per-kind semantics.
    ///
    /// The relational backend applies the batch in one transaction; the
    /// in-memory backends apply it item by item.
    async fn update_list(&self, metrics: &[Metric]) -> Result<()>;

    /// Returns the stored metric or [`StorageError::NotFound`].
    async fn get(&self, id: &str) -> Result<Metric>;

    /// Returns every stored metric as of the call.
    async fn get_all(&self) -> Result<Vec<Metric>>;

    /// Checks that the backing medium is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Releases the backing medium. Safe to call more than once.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
