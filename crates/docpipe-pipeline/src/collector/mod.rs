//! Ingestion pipeline
//!
//! Each cycle fetches new documents from every active datasource, stores
//! them as `pending` and advances the datasource cursor.

mod factory;
mod filesystem;
mod loader;
mod manager;
mod worker;

pub use factory::{DatasourceConstructor, DatasourceFactory};
pub use filesystem::{FilesystemCursor, FilesystemDatasource, FilesystemSettings};
pub use loader::DatasourceLoader;
pub use manager::CollectorManager;
pub use worker::CollectorWorker;

use docpipe_core::{CancellationToken, CollectorConfig, Datasource, DatasourceStore, DocumentStore};
use docpipe_infra::{Meter, RetryPolicy};
use std::sync::Arc;

use crate::metrics::PipelineMetrics;
use crate::registry::Registry;
use crate::supervisor::{ShutdownOutcome, Supervisor, SupervisorConfig};
use crate::Result;

/// Collector pipeline supervisor
pub struct Collector {
    supervisor: Supervisor<CollectorManager, Registry<dyn Datasource>>,
}

impl Collector {
    pub fn new(
        config: &CollectorConfig,
        datasources: Arc<dyn DatasourceStore>,
        documents: Arc<dyn DocumentStore>,
        factory: DatasourceFactory,
        meter: &dyn Meter,
    ) -> Result<Self> {
        let metrics = PipelineMetrics::new(meter, "collector")?;

        let loader = DatasourceLoader::new(datasources.clone(), Arc::new(factory), config.page_size);
        let registry: Arc<Registry<dyn Datasource>> =
            Arc::new(Registry::new("collector", Arc::new(loader)));

        let worker = Arc::new(CollectorWorker::new(
            datasources,
            documents,
            RetryPolicy::fixed(config.retry_attempts, config.retry_delay())
                .with_backoff(config.retry_backoff, config.retry_max_delay())
                .with_jitter(config.retry_jitter),
            metrics.clone(),
        ));
        let manager = Arc::new(CollectorManager::new(
            registry.clone(),
            worker,
            config.worker_count,
            config.interval(),
            metrics,
        ));

        Ok(Self {
            supervisor: Supervisor::new(
                manager,
                registry,
                SupervisorConfig {
                    refresh_interval: config.registry_refresh_interval(),
                    shutdown_timeout: config.shutdown_timeout(),
                },
            ),
        })
    }

    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        self.supervisor.start(cancel).await
    }

    pub async fn stop(&self) -> ShutdownOutcome {
        self.supervisor.stop().await
    }

    pub fn registry(&self) -> &Arc<Registry<dyn Datasource>> {
        self.supervisor.registry()
    }

    pub fn manager(&self) -> &Arc<CollectorManager> {
        self.supervisor.manager()
    }
}
