//! Per-pipeline instruments

use docpipe_infra::{Counter, Histogram, Meter, MetricsError, UpDownCounter};
use std::sync::Arc;

/// Cycle duration buckets in seconds
pub const CYCLE_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Instruments shared by both pipelines, named `{pipeline}_*`
#[derive(Clone)]
pub struct PipelineMetrics {
    pub cycles_total: Arc<Counter>,
    pub cycle_duration: Arc<Histogram>,
    pub active_workers: Arc<UpDownCounter>,
    /// Failures labelled by the unit that produced them
    pub errors_total: Arc<Counter>,
    pub documents_total: Arc<Counter>,
}

impl PipelineMetrics {
    pub fn new(meter: &dyn Meter, pipeline: &str) -> Result<Self, MetricsError> {
        Ok(Self {
            cycles_total: meter.counter(
                &format!("{}_cycles_total", pipeline),
                "Completed pipeline cycles",
            )?,
            cycle_duration: meter.histogram(
                &format!("{}_cycle_duration_seconds", pipeline),
                "Wall time of one pipeline cycle",
                CYCLE_DURATION_BUCKETS.to_vec(),
            )?,
            active_workers: meter.up_down_counter(
                &format!("{}_active_workers", pipeline),
                "Workers currently running in a cycle",
            )?,
            errors_total: meter.counter(
                &format!("{}_errors_total", pipeline),
                "Failures by unit",
            )?,
            documents_total: meter.counter(
                &format!("{}_documents_total", pipeline),
                "Documents handled",
            )?,
        })
    }
}
