use crate::client::Transport;
use crate::config::AgentConfig;
use crate::pipeline::{ReportCounts, ReportPipeline};
use rtmon_collector::cache::{self, MetricCache, SharedCache};
use rtmon_collector::{Collector, HostCollector, RuntimeCollector};
use rtmon_common::ConnRetrier;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Runs the poll, host-sample and report timers until `shutdown` fires, then
/// drains the report queue and returns the final report counts.
pub async fn run(
    config: AgentConfig,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) -> anyhow::Result<ReportCounts> {
    let runtime = RuntimeCollector::new(&config.metrics);
    let names: Vec<&str> = runtime.fields().iter().map(|f| f.name()).collect();
    let cache = cache::shared(MetricCache::new(&names));

    let pollers = vec![
        spawn_poller(Box::new(runtime), cache.clone(), config.poll_interval, true, shutdown.clone()),
        spawn_poller(
            Box::new(HostCollector::new()),
            cache.clone(),
            config.poll_interval,
            false,
            shutdown.clone(),
        ),
    ];

    let pipeline = ReportPipeline::start(
        cache,
        transport,
        ConnRetrier::new(config.retry),
        config.rate_limit,
        config.report_timeout,
    );

    tracing::info!(
        address = %config.address,
        poll_secs = config.poll_interval.as_secs_f64(),
        report_secs = config.report_interval.as_secs_f64(),
        workers = config.rate_limit,
        "Agent started"
    );

    let mut report = ticker(config.report_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = report.tick() => {
                pipeline.trigger();
            }
        }
    }

    for handle in pollers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Poll task panicked");
        }
    }
    let counts = pipeline.shutdown().await;
    tracing::info!(
        queued = counts.queued,
        dropped = counts.dropped,
        sent = counts.sent,
        failed = counts.failed,
        "Agent stopped"
    );
    Ok(counts)
}

fn ticker(every: Duration) -> tokio::time::Interval {
    let mut t = interval_at(Instant::now() + every, every);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

/// Samples `collector` on its own timer. The primary poller also advances
/// `PollCount` and `RandomValue`.
fn spawn_poller(
    mut collector: Box<dyn Collector>,
    cache: SharedCache,
    every: Duration,
    primary: bool,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = ticker(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let metrics = match collector.collect() {
                        Ok(metrics) => metrics,
                        Err(e) => {
                            tracing::warn!(collector = collector.name(), error = %e, "Collection failed");
                            Vec::new()
                        }
                    };
                    let mut entries = cache::write(&cache);
                    if primary {
                        entries.record_poll(metrics);
                    } else {
                        entries.store(metrics);
                    }
                }
            }
        }
        tracing::debug!(collector = collector.name(), "Poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ReportError;
    use async_trait::async_trait;
    use rtmon_common::Metric;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<Vec<Metric>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, batch: &[Metric]) -> Result<(), ReportError> {
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn reports_polled_state_and_stops_on_shutdown() {
        let config = AgentConfig {
            poll_interval: Duration::from_millis(10),
            report_interval: Duration::from_millis(40),
            metrics: vec!["CpuCount".to_string(), "NoSuchField".to_string()],
            ..AgentConfig::default()
        };
        let transport = Arc::new(RecordingTransport::default());
        let shutdown = CancellationToken::new();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            stopper.cancel();
        });

        let counts = run(config, transport.clone(), shutdown).await.unwrap();
        assert!(counts.sent >= 1);
        assert_eq!(counts.failed, 0);

        let batches = transport.batches.lock().unwrap();
        let last = batches.last().unwrap();
        let ids: Vec<_> = last.iter().map(|m| m.id.as_str()).collect();
        for id in ["CpuCount", "PollCount", "RandomValue", "TotalMemory", "FreeMemory", "CPUutilization1"] {
            assert!(ids.contains(&id), "missing {id} in {ids:?}");
        }
        assert!(!ids.contains(&"NoSuchField"));
        let poll = last.iter().find(|m| m.id == "PollCount").unwrap();
        assert!(poll.delta.unwrap() >= 1);
    }
}
