use rtmon_common::{Metric, MetricError, MetricKind};
use rtmon_storage::{MetricsRepository, Result, StorageError};
use std::sync::Arc;

/// Metric operations exposed to the HTTP layer, over any repository.
#[derive(Clone)]
pub struct MetricService {
    repo: Arc<dyn MetricsRepository>,
}

impl MetricService {
    pub fn new(repo: Arc<dyn MetricsRepository>) -> Self {
        Self { repo }
    }

    pub async fn update_gauge(&self, metric: &Metric) -> Result<()> {
        metric.validate()?;
        match (metric.kind, metric.value) {
            (MetricKind::Gauge, Some(value)) => self.repo.update_gauge(&metric.id, value).await,
            _ => Err(MetricError::MissingPayload {
                id: metric.id.clone(),
                kind: metric.kind,
                expected: "value",
            }
            .into()),
        }
    }

    pub async fn update_counter(&self, metric: &Metric) -> Result<()> {
        metric.validate()?;
        match (metric.kind, metric.delta) {
            (MetricKind::Counter, Some(delta)) => self.repo.update_counter(&metric.id, delta).await,
            _ => Err(MetricError::MissingPayload {
                id: metric.id.clone(),
                kind: metric.kind,
                expected: "delta",
            }
            .into()),
        }
    }

    /// Applies `metric` by kind and returns what is stored afterwards.
    pub async fn update(&self, metric: &Metric) -> Result<Metric> {
        match metric.kind {
            MetricKind::Gauge => self.update_gauge(metric).await?,
            MetricKind::Counter => self.update_counter(metric).await?,
        }
        self.get(&Metric::placeholder(metric.id.clone(), metric.kind))
            .await
    }

    pub async fn update_list(&self, metrics: &[Metric]) -> Result<()> {
        self.repo.update_list(metrics).await
    }

    /// Looks up `key.id`; a stored metric of another kind counts as absent.
    pub async fn get(&self, key: &Metric) -> Result<Metric> {
        let stored = self.repo.get(&key.id).await?;
        if stored.kind != key.kind {
            return Err(StorageError::NotFound { id: key.id.clone() });
        }
        Ok(stored)
    }

    /// Every stored metric, sorted by id.
    pub async fn get_all(&self) -> Result<Vec<Metric>> {
        let mut all = self.repo.get_all().await?;
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    pub async fn ping(&self) -> Result<()> {
        self.repo.ping().await
    }
}
