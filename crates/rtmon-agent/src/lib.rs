//! The rtmon agent: samples host and process statistics into a cache and
//! periodically reports the whole cache to the aggregator.

pub mod client;
pub mod config;
pub mod pipeline;
pub mod runner;

pub use client::{HttpTransport, ReportError, Transport};
pub use config::AgentConfig;
pub use pipeline::{ReportCounts, ReportPipeline};
pub use runner::run;
