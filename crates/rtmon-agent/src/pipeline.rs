//! Report pipeline: a bounded job queue drained by a fixed worker pool.
//!
//! Every job reports the whole cache as it is when the job starts, so a job
//! lost to a full queue or to exhausted retries is superseded by the next one.

use crate::client::{ReportError, Transport};
use rtmon_collector::cache::{self, SharedCache};
use rtmon_common::ConnRetrier;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Counters describing what happened to report triggers.
#[derive(Debug, Default)]
pub struct ReportStats {
    queued: AtomicU64,
    dropped: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportCounts {
    pub queued: u64,
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
}

impl ReportStats {
    pub fn counts(&self) -> ReportCounts {
        ReportCounts {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct ReportJob;

struct WorkerContext {
    cache: SharedCache,
    transport: Arc<dyn Transport>,
    retrier: ConnRetrier,
    timeout: Duration,
    stats: Arc<ReportStats>,
}

pub struct ReportPipeline {
    tx: mpsc::Sender<ReportJob>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<ReportStats>,
}

impl ReportPipeline {
    /// Starts `workers` report workers behind a queue of the same capacity.
    pub fn start(
        cache: SharedCache,
        transport: Arc<dyn Transport>,
        retrier: ConnRetrier,
        workers: usize,
        timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(workers);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(ReportStats::default());
        let ctx = Arc::new(WorkerContext {
            cache,
            transport,
            retrier,
            timeout,
            stats: stats.clone(),
        });

        let workers = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, rx.clone(), ctx.clone())))
            .collect();

        Self { tx, workers, stats }
    }

    /// Enqueues one report unless the queue is full. Never blocks.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(ReportJob) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Report queue full, tick dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn stats(&self) -> Arc<ReportStats> {
        self.stats.clone()
    }

    /// Closes the queue, lets workers drain it, and waits for all of them.
    pub async fn shutdown(self) -> ReportCounts {
        drop(self.tx);
        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Report worker panicked");
            }
        }
        self.stats.counts()
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ReportJob>>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        if job.is_none() {
            break;
        }
        report_once(id, &ctx).await;
    }
    tracing::debug!(worker = id, "Report worker stopped");
}

async fn report_once(worker: usize, ctx: &WorkerContext) {
    // The read lock is released before any network I/O.
    let batch = cache::read(&ctx.cache).snapshot();

    let transport = &ctx.transport;
    let batch_ref = &batch;
    let limit = ctx.timeout;
    let outcome = ctx
        .retrier
        .run(move || async move {
            match tokio::time::timeout(limit, transport.send(batch_ref)).await {
                Ok(res) => res,
                Err(_) => Err(ReportError::Timeout(limit)),
            }
        })
        .await;

    match outcome {
        Ok(()) => {
            ctx.stats.sent.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(worker, count = batch.len(), "Report sent");
        }
        Err(e) => {
            ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(worker, error = %e, "Report failed");
        }
    }
}
