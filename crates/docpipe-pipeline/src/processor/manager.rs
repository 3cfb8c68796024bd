use async_trait::async_trait;
use docpipe_core::{
    CancellationToken, DocumentFilter, DocumentStatus, DocumentStore, ProcessorUnit,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::worker::ProcessorWorker;
use crate::manager::{run_periodic, Cycle};
use crate::metrics::PipelineMetrics;
use crate::pool::{CycleReport, WorkerPool};
use crate::registry::Registry;

/// Claims a batch of pending documents per cycle and fans them out
pub struct ProcessorManager {
    registry: Arc<Registry<dyn ProcessorUnit>>,
    documents: Arc<dyn DocumentStore>,
    worker: Arc<ProcessorWorker>,
    pool: WorkerPool,
    batch_size: u32,
    interval: Duration,
    metrics: PipelineMetrics,
}

impl ProcessorManager {
    pub fn new(
        registry: Arc<Registry<dyn ProcessorUnit>>,
        documents: Arc<dyn DocumentStore>,
        worker: Arc<ProcessorWorker>,
        worker_count: usize,
        batch_size: u32,
        interval: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            registry,
            documents,
            worker,
            pool: WorkerPool::new("processor", worker_count, metrics.active_workers.clone()),
            batch_size: batch_size.max(1),
            interval,
            metrics,
        }
    }

    /// Run cycles until `cancel` fires
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) {
        run_periodic(self, cancel).await
    }
}

#[async_trait]
impl Cycle for ProcessorManager {
    fn name(&self) -> &'static str {
        "processor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let _timer = self.metrics.cycle_duration.start_timer();
        self.metrics.cycles_total.inc();

        // claiming with nothing to run would only bounce documents back to pending
        if self.registry.is_empty() {
            debug!("No processor units registered");
            return CycleReport::empty(self.pool.worker_count());
        }

        let claimed = match self
            .documents
            .get_for_processing(&DocumentFilter::by_status(DocumentStatus::Pending), self.batch_size)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                self.metrics.errors_total.inc_for("claim");
                error!(error = %e, "Failed to claim documents");
                return CycleReport::empty(self.pool.worker_count());
            }
        };

        if claimed.is_empty() {
            debug!("No pending documents");
            return CycleReport::empty(self.pool.worker_count());
        }

        let total = claimed.len();
        let report = self.pool.run(claimed, self.worker.clone(), cancel).await;

        info!(
            documents = total,
            succeeded = report.succeeded(),
            failures = report.failures,
            abandoned = report.abandoned,
            "Processor cycle finished"
        );
        report
    }
}
