use async_trait::async_trait;
use docpipe_core::{CancellationToken, Datasource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::worker::CollectorWorker;
use crate::manager::{run_periodic, Cycle};
use crate::metrics::PipelineMetrics;
use crate::pool::{CycleReport, WorkerPool};
use crate::registry::Registry;

/// Fans every registered datasource out to the worker pool once per cycle
pub struct CollectorManager {
    registry: Arc<Registry<dyn Datasource>>,
    worker: Arc<CollectorWorker>,
    pool: WorkerPool,
    interval: Duration,
    metrics: PipelineMetrics,
}

impl CollectorManager {
    pub fn new(
        registry: Arc<Registry<dyn Datasource>>,
        worker: Arc<CollectorWorker>,
        worker_count: usize,
        interval: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            registry,
            worker,
            pool: WorkerPool::new("collector", worker_count, metrics.active_workers.clone()),
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
impl Cycle for CollectorManager {
    fn name(&self) -> &'static str {
        "collector"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let _timer = self.metrics.cycle_duration.start_timer();
        self.metrics.cycles_total.inc();

        let datasources = self.registry.get_all();
        if datasources.is_empty() {
            debug!("No datasources registered");
            return CycleReport::empty(self.pool.worker_count());
        }

        let total = datasources.len();
        let report = self.pool.run(datasources, self.worker.clone(), cancel).await;

        info!(
            datasources = total,
            succeeded = report.succeeded(),
            failures = report.failures,
            abandoned = report.abandoned,
            "Collector cycle finished"
        );
        report
    }
}
