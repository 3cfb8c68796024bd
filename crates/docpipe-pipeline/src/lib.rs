//! Collector and processor pipelines
//!
//! Both pipelines are built from the same parts:
//!
//! - [`Registry`]: the live set of pluggable units, rebuilt from durable
//!   configuration on a timer and swapped in atomically
//! - a manager that runs one cycle per tick and fans work out to a
//!   [`WorkerPool`]
//! - a [`Supervisor`] that owns the manager and refresh tasks and bounds
//!   shutdown with a timeout
//!
//! The [`Collector`] ingests documents from datasources; the [`Processor`]
//! claims pending documents and runs enrichment units over them.

pub mod collector;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod processor;
pub mod registry;
pub mod supervisor;
pub mod units;

pub use collector::{
    Collector, CollectorManager, CollectorWorker, DatasourceFactory, DatasourceLoader,
    FilesystemDatasource,
};
pub use manager::{run_periodic, Cycle};
pub use metrics::PipelineMetrics;
pub use pool::{CycleReport, WorkHandler, WorkerPool};
pub use processor::{EmbeddingUnitLoader, Processor, ProcessorManager, ProcessorWorker};
pub use registry::{Refresh, Registry, RegistryLoader};
pub use supervisor::{ShutdownOutcome, Supervisor, SupervisorConfig};
pub use units::{EmbeddingUnit, TextChunker};

use docpipe_core::CoreError;
use docpipe_infra::MetricsError;
use uuid::Uuid;

/// Error types for pipeline construction and lifecycle
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Unit already registered: {0}")]
    AlreadyRegistered(Uuid),

    #[error("Pipeline already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let err = PipelineError::AlreadyRegistered(id);
        assert!(err.to_string().contains(&id.to_string()));

        let err: PipelineError = CoreError::storage("down").into();
        assert_eq!(err.to_string(), "Storage error: down");
    }
}
