use async_trait::async_trait;
use chrono::Utc;
use docpipe_core::{
    CancellationToken, CoreError, Datasource, DatasourceStore, DocumentStatus, DocumentStore,
    Result,
};
use docpipe_infra::{retry_with_cancel, RetryPolicy};
use std::sync::Arc;
use tracing::{error, info};

use crate::metrics::PipelineMetrics;
use crate::pool::WorkHandler;

/// Runs one datasource fetch and stores its output.
///
/// The cursor is written only after every document of the batch is stored.
pub struct CollectorWorker {
    datasources: Arc<dyn DatasourceStore>,
    documents: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    metrics: PipelineMetrics,
}

impl CollectorWorker {
    pub fn new(
        datasources: Arc<dyn DatasourceStore>,
        documents: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            datasources,
            documents,
            retry,
            metrics,
        }
    }

    /// Fetch, store and advance the cursor, returning the number of documents stored
    pub async fn collect(&self, cancel: &CancellationToken, datasource: &dyn Datasource) -> Result<usize> {
        let id = datasource.id();
        let config = self
            .datasources
            .get_datasource(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("datasource {}", id)))?;

        let state = &config.state;
        let batch = retry_with_cancel(&self.retry, cancel, |_| datasource.get_data(cancel, state)).await?;

        let fetched_at = Utc::now();
        let count = batch.documents.len();
        for mut document in batch.documents {
            document.datasource_id = Some(id);
            document.fetched_at = fetched_at;
            document.status = DocumentStatus::Pending;
            self.documents.insert(&document).await?;
        }

        self.datasources
            .update_datasource(id, &config.settings, &batch.state)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl WorkHandler<Arc<dyn Datasource>> for CollectorWorker {
    async fn handle(&self, cancel: &CancellationToken, datasource: Arc<dyn Datasource>) -> Result<()> {
        let id = datasource.id();

        match self.collect(cancel, datasource.as_ref()).await {
            Ok(count) => {
                self.metrics.documents_total.inc_by(count as u64);
                info!(datasource_id = %id, kind = datasource.kind(), documents = count, "Collected documents");
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                info!(datasource_id = %id, "Collection cancelled");
                Err(e)
            }
            Err(e) => {
                self.metrics.errors_total.inc_for(&id.to_string());
                error!(datasource_id = %id, kind = datasource.kind(), error = %e, "Collection failed");
                Err(e)
            }
        }
    }
}
