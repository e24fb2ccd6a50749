use crate::entities::metric;
use crate::error::{is_transient, Result, StorageError};
use crate::MetricsRepository;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use rtmon_common::{ConnRetrier, Metric, MetricKind};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, Insert, QueryOrder, TransactionTrait,
};
use std::time::Duration;

/// How long one attempt waits for a pooled connection before it counts as
/// refused and goes back to the retrier.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Relational repository backed by sea-orm (PostgreSQL or SQLite).
///
/// Single-item operations and the start of a batch transaction are retried
/// on refused connections. Statements inside a transaction are not.
pub struct DbStorage {
    db: DatabaseConnection,
    retrier: ConnRetrier,
}

impl DbStorage {
    /// Connects to `url` and brings the schema up to date.
    ///
    /// Failure here is fatal for the server.
    pub async fn connect(url: &str, retrier: ConnRetrier) -> Result<Self> {
        Self::connect_with_timeout(url, retrier, DEFAULT_ACQUIRE_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        url: &str,
        retrier: ConnRetrier,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let mut opts = ConnectOptions::new(url.to_owned());
        opts.sqlx_logging(false)
            .connect_timeout(acquire_timeout)
            .acquire_timeout(acquire_timeout);

        let db = retrier
            .run_when(is_transient, || Database::connect(opts.clone()))
            .await?;
        Migrator::up(&db, None).await?;
        tracing::info!(backend = ?db.get_database_backend(), "Relational storage ready");
        Ok(Self::from_connection(db, retrier))
    }

    pub fn from_connection(db: DatabaseConnection, retrier: ConnRetrier) -> Self {
        Self { db, retrier }
    }

    /// Replays `applied` (the statements run so far, failing one last) over
    /// the committed row to tell a counter overflow apart from other
    /// constraint failures.
    async fn explain_failure(&self, applied: &[&Metric]) -> Option<StorageError> {
        let id = &applied.last()?.id;
        let row = metric::Entity::find_by_id(id.clone()).one(&self.db).await.ok()?;
        let mut current = row.and_then(|row| model_to_metric(row).ok());
        for m in applied.iter().filter(|m| &m.id == id) {
            match current.as_mut() {
                Some(stored) => {
                    if let Err(e) = stored.merge(m) {
                        return Some(e.into());
                    }
                }
                None => current = Some((*m).clone()),
            }
        }
        None
    }
}

fn upsert_gauge(id: &str, value: f64) -> Insert<metric::ActiveModel> {
    let row = metric::ActiveModel {
        id: Set(id.to_owned()),
        m_type: Set(MetricKind::Gauge.as_str().to_owned()),
        m_value: Set(Some(value)),
        m_delta: Set(None),
    };
    metric::Entity::insert(row).on_conflict(
        OnConflict::column(metric::Column::Id)
            .update_columns([
                metric::Column::MType,
                metric::Column::MValue,
                metric::Column::MDelta,
            ])
            .to_owned(),
    )
}

fn upsert_counter(id: &str, delta: i64) -> Insert<metric::ActiveModel> {
    let row = metric::ActiveModel {
        id: Set(id.to_owned()),
        m_type: Set(MetricKind::Counter.as_str().to_owned()),
        m_value: Set(None),
        m_delta: Set(Some(delta)),
    };
    // Accumulate onto the stored delta; a gauge row has none, so it is replaced.
    metric::Entity::insert(row).on_conflict(
        OnConflict::column(metric::Column::Id)
            .update_columns([metric::Column::MType, metric::Column::MValue])
            .value(metric::Column::MDelta, Expr::cust(COUNTER_SUM))
            .to_owned(),
    )
}

// An out-of-range sum becomes NULL and trips the table CHECK, so neither
// engine stores a wrapped or floating-point total.
const COUNTER_SUM: &str = "CASE \
    WHEN excluded.m_delta > 0 THEN CASE \
        WHEN metrics.m_delta > 9223372036854775807 - excluded.m_delta THEN NULL \
        ELSE COALESCE(metrics.m_delta, 0) + excluded.m_delta END \
    WHEN excluded.m_delta < 0 THEN CASE \
        WHEN metrics.m_delta < (-9223372036854775807 - 1) - excluded.m_delta THEN NULL \
        ELSE COALESCE(metrics.m_delta, 0) + excluded.m_delta END \
    ELSE COALESCE(metrics.m_delta, 0) END";

async fn exec_upsert<C: ConnectionTrait>(conn: &C, m: &Metric) -> std::result::Result<(), DbErr> {
    match m.kind {
        MetricKind::Gauge => {
            upsert_gauge(&m.id, m.value.unwrap_or_default())
                .exec_without_returning(conn)
                .await?
        }
        MetricKind::Counter => {
            upsert_counter(&m.id, m.delta.unwrap_or_default())
                .exec_without_returning(conn)
                .await?
        }
    };
    Ok(())
}

/// Orders a batch by id so concurrent batches take row locks in the same
/// order. Duplicates keep their relative order.
pub fn ordered_for_upsert(metrics: &[Metric]) -> Vec<&Metric> {
    let mut ordered: Vec<&Metric> = metrics.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    ordered
}

fn model_to_metric(row: metric::Model) -> Result<Metric> {
    let kind: MetricKind = row.m_type.parse()?;
    let metric = Metric {
        id: row.id,
        kind,
        delta: row.m_delta,
        value: row.m_value,
    };
    metric.validate()?;
    Ok(metric)
}

#[async_trait]
impl MetricsRepository for DbStorage {
    async fn update_gauge(&self, id: &str, value: f64) -> Result<()> {
        Metric::gauge(id, value).validate()?;
        let db = &self.db;
        self.retrier
            .run_when(is_transient, move || upsert_gauge(id, value).exec_without_returning(db))
            .await?;
        Ok(())
    }

    async fn update_counter(&self, id: &str, delta: i64) -> Result<()> {
        let update = Metric::counter(id, delta);
        update.validate()?;
        let db = &self.db;
        let res = self
            .retrier
            .run_when(is_transient, move || upsert_counter(id, delta).exec_without_returning(db))
            .await;
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_transient(&e) => Err(e.into()),
            Err(e) => Err(self.explain_failure(&[&update]).await.unwrap_or_else(|| e.into())),
        }
    }

    async fn update_list(&self, metrics: &[Metric]) -> Result<()> {
        for m in metrics {
            m.validate()?;
        }
        if metrics.is_empty() {
            return Ok(());
        }

        let db = &self.db;
        let txn = self.retrier.run_when(is_transient, move || db.begin()).await?;
        let ordered = ordered_for_upsert(metrics);
        for (i, m) in ordered.iter().enumerate() {
            if let Err(e) = exec_upsert(&txn, m).await {
                tracing::error!(id = %m.id, error = %e, "Batch upsert failed, rolling back");
                txn.rollback().await?;
                return Err(self
                    .explain_failure(&ordered[..=i])
                    .await
                    .unwrap_or_else(|| e.into()));
            }
        }
        txn.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Metric> {
        let db = &self.db;
        let row = self
            .retrier
            .run_when(is_transient, move || metric::Entity::find_by_id(id.to_owned()).one(db))
            .await?;
        match row {
            Some(row) => model_to_metric(row),
            None => Err(StorageError::NotFound { id: id.to_string() }),
        }
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        let db = &self.db;
        let rows = self
            .retrier
            .run_when(is_transient, move || {
                metric::Entity::find()
                    .order_by_asc(metric::Column::Id)
                    .all(db)
            })
            .await?;
        rows.into_iter().map(model_to_metric).collect()
    }

    async fn ping(&self) -> Result<()> {
        let db = &self.db;
        self.retrier.run_when(is_transient, move || db.ping()).await?;
        Ok(())
    }
}
