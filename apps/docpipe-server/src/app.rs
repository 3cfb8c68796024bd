//! Wiring and lifecycle of the pipelines

use anyhow::{Context, Result};
use docpipe_core::{AppConfig, DatasourceStore, DocumentStore, EmbeddingProviderStore};
use docpipe_infra::{
    create_pool, rollback_migrations, run_migrations, MetricsRegistry, OpenAiEmbedderFactory, PgDatasourceStore,
    PgDocumentStore, PgEmbeddingProviderStore, PgPoolConfig,
};
use docpipe_pipeline::{Collector, DatasourceFactory, Processor, ShutdownOutcome};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::Args;

/// Main application
pub struct App {
    args: Args,
    config: AppConfig,
    pool: PgPool,
    meter: MetricsRegistry,
}

impl App {
    /// Load configuration, connect to Postgres and migrate the schema
    pub async fn build(args: Args) -> Result<Self> {
        let config = match &args.config {
            Some(path) => AppConfig::load_from_file(&path.to_string_lossy())
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => AppConfig::load().context("Failed to load configuration")?,
        };

        let pool = create_pool(&PgPoolConfig::from(&config.database))
            .await
            .context("Failed to connect to database")?;

        match args.rollback_to {
            Some(target) => {
                let reverted = rollback_migrations(&pool, target)
                    .await
                    .context("Failed to roll back migrations")?;
                info!(reverted = reverted, target_version = target, "Rolled back migrations");
            }
            None if args.skip_migrations => debug!("Skipping migrations"),
            None => {
                let applied = run_migrations(&pool).await.context("Failed to run migrations")?;
                info!(applied = applied, "Database schema up to date");
            }
        }

        Ok(Self {
            args,
            config,
            pool,
            meter: MetricsRegistry::default(),
        })
    }

    /// Start the selected pipelines and run until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        // a rollback run only touches the schema
        if self.args.rollback_to.is_some() {
            self.pool.close().await;
            return Ok(());
        }

        let datasources: Arc<dyn DatasourceStore> = Arc::new(PgDatasourceStore::new(self.pool.clone()));
        let documents: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(self.pool.clone()));
        let providers: Arc<dyn EmbeddingProviderStore> =
            Arc::new(PgEmbeddingProviderStore::new(self.pool.clone()));

        let collector = if self.args.mode.runs_collector() {
            let factory = DatasourceFactory::with_builtin();
            info!(kinds = ?factory.kinds(), "Datasource kinds available");
            Some(
                Collector::new(&self.config.collector, datasources, documents.clone(), factory, &self.meter)
                    .context("Failed to build collector")?,
            )
        } else {
            None
        };

        let processor = if self.args.mode.runs_processor() {
            Some(
                Processor::new(
                    &self.config.processor,
                    &self.config.embedding,
                    documents,
                    providers,
                    Arc::new(OpenAiEmbedderFactory::new(self.config.embedding.timeout())),
                    &self.meter,
                )
                .context("Failed to build processor")?,
            )
        } else {
            None
        };

        let root = CancellationToken::new();

        if let Some(collector) = &collector {
            collector.start(&root).await.context("Failed to start collector")?;
        }
        if let Some(processor) = &processor {
            if let Err(e) = processor.start(&root).await {
                if let Some(collector) = &collector {
                    collector.stop().await;
                }
                return Err(e).context("Failed to start processor");
            }
        }

        shutdown_signal().await;
        info!("Shutdown signal received, stopping pipelines");

        let (collected, processed) = tokio::join!(
            async {
                match &collector {
                    Some(collector) => Some(collector.stop().await),
                    None => None,
                }
            },
            async {
                match &processor {
                    Some(processor) => Some(processor.stop().await),
                    None => None,
                }
            },
        );
        report_shutdown("collector", collected);
        report_shutdown("processor", processed);

        debug!(metrics = %self.meter.render(), "Final metrics");
        self.pool.close().await;
        Ok(())
    }
}

fn report_shutdown(pipeline: &str, outcome: Option<ShutdownOutcome>) {
    match outcome {
        Some(ShutdownOutcome::Graceful) => info!(pipeline = pipeline, "Stopped"),
        Some(ShutdownOutcome::TimedOut) => {
            warn!(pipeline = pipeline, "Stop timed out, in-flight work abandoned")
        }
        None => {}
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
