use rand::Rng;
use rtmon_common::{Metric, MetricKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

/// Latest known value of every metric the agent reports.
///
/// Each instance is seeded with its own `PollCount` counter and
/// `RandomValue` gauge; nothing is shared between instances.
#[derive(Debug, Clone)]
pub struct MetricCache {
    entries: HashMap<String, Metric>,
}

impl MetricCache {
    /// Creates a cache seeded with the synthetic entries and a zero gauge for
    /// each of `gauge_names`.
    pub fn new<S: AsRef<str>>(gauge_names: &[S]) -> Self {
        let mut entries = HashMap::with_capacity(gauge_names.len() + 2);
        entries.insert(POLL_COUNT.to_string(), Metric::counter(POLL_COUNT, 0));
        entries.insert(RANDOM_VALUE.to_string(), Metric::gauge(RANDOM_VALUE, 0.0));
        for name in gauge_names {
            let name = name.as_ref();
            entries.insert(name.to_string(), Metric::gauge(name, 0.0));
        }
        Self { entries }
    }

    /// Folds one poll tick in: stores `gauges`, bumps `PollCount` by one and
    /// re-rolls `RandomValue`.
    pub fn record_poll(&mut self, gauges: Vec<Metric>) {
        self.store(gauges);
        let poll = self
            .entries
            .entry(POLL_COUNT.to_string())
            .or_insert_with(|| Metric::counter(POLL_COUNT, 0));
        poll.delta = Some(poll.delta.unwrap_or(0).wrapping_add(1));

        let random = f64::from(rand::thread_rng().gen_range(0..1000u32));
        self.entries
            .insert(RANDOM_VALUE.to_string(), Metric::gauge(RANDOM_VALUE, random));
    }

    /// Overwrites entries with `metrics`.
    pub fn store(&mut self, metrics: Vec<Metric>) {
        for m in metrics {
            self.entries.insert(m.id.clone(), m);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Metric> {
        self.entries.get(id)
    }

    pub fn poll_count(&self) -> i64 {
        self.entries
            .get(POLL_COUNT)
            .filter(|m| m.kind == MetricKind::Counter)
            .and_then(|m| m.delta)
            .unwrap_or(0)
    }

    /// Copies every entry out, sorted by id.
    pub fn snapshot(&self) -> Vec<Metric> {
        let mut all: Vec<Metric> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache shared between the poll timer (writer) and report workers (readers).
pub type SharedCache = Arc<RwLock<MetricCache>>;

pub fn shared(cache: MetricCache) -> SharedCache {
    Arc::new(RwLock::new(cache))
}

/// Lock the cache for reading, recovering from a poisoned lock if necessary.
pub fn read(cache: &SharedCache) -> RwLockReadGuard<'_, MetricCache> {
    cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn write(cache: &SharedCache) -> RwLockWriteGuard<'_, MetricCache> {
    cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
