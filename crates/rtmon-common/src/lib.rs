//! Shared data model, connection-retry primitive and body signing for the
//! rtmon agent and aggregator.

pub mod retry;
pub mod signing;
pub mod types;

pub use retry::{ConnRetrier, RetryPolicy};
pub use types::{Metric, MetricError, MetricKind};
