use crate::error::{Result, StorageError};
use crate::MetricsRepository;
use async_trait::async_trait;
use rtmon_common::Metric;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Concurrency-safe keyed map of metrics.
///
/// Every read-modify-write happens under one write-lock acquisition, so
/// concurrent counter updates for the same key never lose an increment.
#[derive(Default)]
pub struct MemStorage {
    data: RwLock<HashMap<String, Metric>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map for reading, recovering from a poisoned lock if necessary.
    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<String, Metric>> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<String, Metric>> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Folds one validated update into the map.
    pub fn apply(&self, update: &Metric) -> Result<()> {
        self.apply_all(std::slice::from_ref(update))
    }

    /// Folds a batch into the map under one write lock. The merged entries
    /// are staged first, so a failing item (an overflowing counter) leaves
    /// the map as it was.
    pub fn apply_all(&self, updates: &[Metric]) -> Result<()> {
        for m in updates {
            m.validate()?;
        }
        let mut map = self.write_map();
        let mut staged: HashMap<String, Metric> = HashMap::new();
        for update in updates {
            let current = staged.get(&update.id).or_else(|| map.get(&update.id));
            let next = match current {
                Some(stored) => {
                    let mut next = stored.clone();
                    next.merge(update)?;
                    next
                }
                None => update.clone(),
            };
            staged.insert(update.id.clone(), next);
        }
        map.extend(staged);
        Ok(())
    }

    /// Inserts restored records as-is, replacing any existing entry.
    pub fn load(&self, metrics: Vec<Metric>) -> Result<()> {
        for m in &metrics {
            m.validate()?;
        }
        let mut map = self.write_map();
        for m in metrics {
            map.insert(m.id.clone(), m);
        }
        Ok(())
    }

    /// Copies the whole map out, sorted by id.
    pub fn snapshot(&self) -> Vec<Metric> {
        let mut all: Vec<Metric> = self.read_map().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }
}

#[async_trait]
impl MetricsRepository for MemStorage {
    async fn update_gauge(&self, id: &str, value: f64) -> Result<()> {
        self.apply(&Metric::gauge(id, value))
    }

    async fn update_counter(&self, id: &str, delta: i64) -> Result<()> {
        self.apply(&Metric::counter(id, delta))
    }

    async fn update_list(&self, metrics: &[Metric]) -> Result<()> {
        self.apply_all(metrics)
    }

    async fn get(&self, id: &str) -> Result<Metric> {
        self.read_map()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        Ok(self.read_map().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_counter_updates_never_lose_increments() {
        let store = Arc::new(MemStorage::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store.update_counter("hits", 1).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("hits").await.unwrap().delta, Some(2000));
    }

    #[tokio::test]
    async fn update_list_rejects_invalid_items_before_applying() {
        let store = MemStorage::new();
        let mut bad = Metric::gauge("g", 1.0);
        bad.value = None;
        let err = store
            .update_list(&[Metric::counter("c", 1), bad])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMetric(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn overflowing_batch_leaves_the_map_untouched() {
        let store = MemStorage::new();
        store.update_counter("c", i64::MAX - 1).await.unwrap();
        let err = store
            .update_list(&[Metric::gauge("g", 1.0), Metric::counter("c", 1), Metric::counter("c", 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidMetric(rtmon_common::MetricError::Overflow { .. })
        ));
        assert_eq!(store.snapshot(), vec![Metric::counter("c", i64::MAX - 1)]);

        assert!(store.update_counter("", 1).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_is_isolated_from_later_writes() {
        let store = MemStorage::new();
        store.update_gauge("x", 1.0).await.unwrap();
        let before = store.get_all().await.unwrap();
        store.update_gauge("x", 2.0).await.unwrap();
        assert_eq!(before, vec![Metric::gauge("x", 1.0)]);
    }

    #[test]
    fn load_replaces_instead_of_accumulating() {
        let store = MemStorage::new();
        store.apply(&Metric::counter("c", 10)).unwrap();
        store.load(vec![Metric::counter("c", 3)]).unwrap();
        assert_eq!(store.snapshot(), vec![Metric::counter("c", 3)]);
    }
}
