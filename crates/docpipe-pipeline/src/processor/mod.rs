//! Enrichment pipeline
//!
//! Each cycle claims a batch of `pending` documents, runs every registered
//! unit over each one and records `ready_to_search` or `error_processing`.

mod loader;
mod manager;
mod worker;

pub use loader::EmbeddingUnitLoader;
pub use manager::ProcessorManager;
pub use worker::ProcessorWorker;

use docpipe_core::{
    CancellationToken, DocumentStore, EmbeddingConfig, EmbeddingProviderStore, ProcessorConfig,
    ProcessorUnit,
};
use docpipe_infra::{EmbedderFactory, Meter, RetryPolicy};
use std::sync::Arc;

use crate::metrics::PipelineMetrics;
use crate::registry::{Registry, RegistryLoader};
use crate::supervisor::{ShutdownOutcome, Supervisor, SupervisorConfig};
use crate::Result;

/// Processor pipeline supervisor
pub struct Processor {
    supervisor: Supervisor<ProcessorManager, Registry<dyn ProcessorUnit>>,
}

impl Processor {
    /// Processor whose units come from the active embedding provider
    pub fn new(
        config: &ProcessorConfig,
        embedding: &EmbeddingConfig,
        documents: Arc<dyn DocumentStore>,
        providers: Arc<dyn EmbeddingProviderStore>,
        embedders: Arc<dyn EmbedderFactory>,
        meter: &dyn Meter,
    ) -> Result<Self> {
        let loader = EmbeddingUnitLoader::new(providers, embedders, embedding.clone());
        Self::with_loader(config, Arc::new(loader), documents, meter)
    }

    pub fn with_loader(
        config: &ProcessorConfig,
        loader: Arc<dyn RegistryLoader<dyn ProcessorUnit>>,
        documents: Arc<dyn DocumentStore>,
        meter: &dyn Meter,
    ) -> Result<Self> {
        let metrics = PipelineMetrics::new(meter, "processor")?;
        let partial_failures = meter.counter(
            "processor_partial_failures_total",
            "Documents where some but not all units failed",
        )?;

        let registry: Arc<Registry<dyn ProcessorUnit>> = Arc::new(Registry::new("processor", loader));

        let worker = Arc::new(ProcessorWorker::new(
            registry.clone(),
            documents.clone(),
            RetryPolicy::fixed(config.retry_attempts, config.retry_delay())
                .with_backoff(config.retry_backoff, config.retry_max_delay())
                .with_jitter(config.retry_jitter),
            metrics.clone(),
            partial_failures,
        ));
        let manager = Arc::new(ProcessorManager::new(
            registry.clone(),
            documents,
            worker,
            config.worker_count,
            config.batch_size,
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

    pub fn registry(&self) -> &Arc<Registry<dyn ProcessorUnit>> {
        self.supervisor.registry()
    }

    pub fn manager(&self) -> &Arc<ProcessorManager> {
        self.supervisor.manager()
    }
}
