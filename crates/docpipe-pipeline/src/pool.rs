//! Work-stealing worker pool
//!
//! All items of a cycle go into one bounded channel sized to the batch; the
//! sender is dropped and `worker_count` tasks pull from the shared receiver,
//! so every item is handled by exactly one worker.

use async_trait::async_trait;
use docpipe_infra::UpDownCounter;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Handles one item of work
#[async_trait]
pub trait WorkHandler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, cancel: &CancellationToken, item: T) -> docpipe_core::Result<()>;

    /// Items left in the queue when the cycle was cancelled
    async fn abandon(&self, _items: Vec<T>) {}
}

/// Outcome of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items handled by each worker, successful or not
    pub processed_per_worker: Vec<usize>,
    pub failures: usize,
    pub abandoned: usize,
}

impl CycleReport {
    pub fn empty(worker_count: usize) -> Self {
        Self {
            processed_per_worker: vec![0; worker_count],
            ..Default::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.processed_per_worker.iter().sum()
    }

    pub fn succeeded(&self) -> usize {
        self.processed().saturating_sub(self.failures)
    }
}

struct WorkerOutcome {
    worker_id: usize,
    processed: usize,
    failures: usize,
}

pub struct WorkerPool {
    name: &'static str,
    worker_count: usize,
    active_workers: Arc<UpDownCounter>,
}

impl WorkerPool {
    pub fn new(name: &'static str, worker_count: usize, active_workers: Arc<UpDownCounter>) -> Self {
        Self {
            name,
            worker_count: worker_count.max(1),
            active_workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Distribute `items` over the workers and wait for all of them
    pub async fn run<T, H>(
        &self,
        items: Vec<T>,
        handler: Arc<H>,
        cancel: &CancellationToken,
    ) -> CycleReport
    where
        T: Send + 'static,
        H: WorkHandler<T>,
    {
        let mut report = CycleReport::empty(self.worker_count);
        if items.is_empty() {
            return report;
        }

        let (tx, rx) = mpsc::channel(items.len());
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();

        for worker_id in 0..self.worker_count {
            let rx = rx.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            let active = self.active_workers.clone();
            let pool = self.name;

            workers.spawn(async move {
                let _active = active.track();
                let mut outcome = WorkerOutcome {
                    worker_id,
                    processed: 0,
                    failures: 0,
                };

                loop {
                    if cancel.is_cancelled() {
                        break;
                    }

                    let next = rx.lock().await.recv().await;
                    let Some(item) = next else {
                        break;
                    };

                    outcome.processed += 1;
                    if let Err(e) = handler.handle(&cancel, item).await {
                        outcome.failures += 1;
                        debug!(pool = pool, worker_id = worker_id, error = %e, "Work item failed");
                    }
                }

                outcome
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    report.processed_per_worker[outcome.worker_id] = outcome.processed;
                    report.failures += outcome.failures;
                }
                Err(e) => {
                    error!(pool = self.name, error = %e, "Worker task failed");
                }
            }
        }

        let mut leftover = Vec::new();
        {
            let mut rx = rx.lock().await;
            while let Ok(item) = rx.try_recv() {
                leftover.push(item);
            }
        }
        if !leftover.is_empty() {
            report.abandoned = leftover.len();
            debug!(pool = self.name, abandoned = report.abandoned, "Cycle cancelled with queued work");
            handler.abandon(leftover).await;
        }

        report
    }
}
