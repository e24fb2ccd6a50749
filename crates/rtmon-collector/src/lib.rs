//! Metric collection for the rtmon agent.
//!
//! Each [`Collector`] samples one source of statistics and returns them as
//! gauges. The agent folds collector output into a [`cache::MetricCache`],
//! which also owns the synthetic `PollCount` and `RandomValue` entries.

pub mod cache;
pub mod host;
pub mod runtime;

use anyhow::Result;
use rtmon_common::Metric;

pub use cache::{MetricCache, SharedCache};
pub use host::HostCollector;
pub use runtime::{RuntimeCollector, RuntimeField};

/// A statistics source sampled on the agent host.
///
/// Collectors are driven from a single timer task, so `collect` takes
/// `&mut self` and may keep refresh state between calls.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"runtime"`, `"host"`), used for
    /// logging.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}
