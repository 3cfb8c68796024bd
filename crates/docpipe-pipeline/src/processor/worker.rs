use async_trait::async_trait;
use docpipe_core::{
    CancellationToken, CoreError, Document, DocumentFilter, DocumentStatus, DocumentStore,
    ProcessorUnit, QueryOptions, Result,
};
use docpipe_infra::{retry_with_cancel, Counter, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::PipelineMetrics;
use crate::pool::WorkHandler;
use crate::registry::Registry;

/// Runs every registered unit over one claimed document
pub struct ProcessorWorker {
    registry: Arc<Registry<dyn ProcessorUnit>>,
    documents: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    metrics: PipelineMetrics,
    partial_failures: Arc<Counter>,
}

impl ProcessorWorker {
    pub fn new(
        registry: Arc<Registry<dyn ProcessorUnit>>,
        documents: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
        metrics: PipelineMetrics,
        partial_failures: Arc<Counter>,
    ) -> Self {
        Self {
            registry,
            documents,
            retry,
            metrics,
            partial_failures,
        }
    }

    /// Process one claimed document and persist the resulting status.
    ///
    /// Units run in sequence and a failing unit does not stop the rest.
    /// If `cancel` fires between units the claim is released and nothing
    /// the earlier units did is written.
    pub async fn process_document(&self, cancel: &CancellationToken, id: Uuid) -> Result<DocumentStatus> {
        let mut document = self
            .documents
            .get(&DocumentFilter::by_id(id), QueryOptions::limit(1))
            .await?
            .first()
            .ok_or_else(|| CoreError::NotFound(format!("document {}", id)))?;

        let units = self.registry.get_all();
        if units.is_empty() {
            document.status = DocumentStatus::Pending;
            self.persist(&document).await?;
            return Ok(DocumentStatus::Pending);
        }

        let mut failed = 0usize;
        for unit in &units {
            if cancel.is_cancelled() {
                self.documents.release(&[id]).await?;
                return Err(CoreError::Cancelled);
            }

            match self.run_unit(cancel, unit.as_ref(), &document).await {
                Ok(updated) => document = updated,
                Err(e) if e.is_cancelled() => {
                    self.documents.release(&[id]).await?;
                    return Err(e);
                }
                Err(e) => {
                    failed += 1;
                    self.metrics.errors_total.inc_for(unit.name());
                    warn!(document_id = %id, unit = unit.name(), error = %e, "Processor unit failed");
                }
            }
        }

        let status = if failed == 0 {
            DocumentStatus::ReadyToSearch
        } else {
            DocumentStatus::ErrorProcessing
        };

        document.status = status;
        if !self.persist(&document).await? {
            return Ok(DocumentStatus::Pending);
        }
        if failed > 0 && failed < units.len() {
            self.partial_failures.inc();
        }
        Ok(status)
    }

    /// Each attempt works on a copy, so a failed attempt leaves no trace
    async fn run_unit(
        &self,
        cancel: &CancellationToken,
        unit: &dyn ProcessorUnit,
        document: &Document,
    ) -> Result<Document> {
        retry_with_cancel(&self.retry, cancel, |_| {
            let mut attempt = document.clone();
            async move {
                unit.process(cancel, &mut attempt).await?;
                Ok(attempt)
            }
        })
        .await
    }

    /// Returns false when the document was re-ingested during processing.
    /// The stale result is dropped and the new revision goes back to pending.
    async fn persist(&self, document: &Document) -> Result<bool> {
        let Err(e) = self.documents.update(document).await else {
            return Ok(true);
        };

        // hand the claim back rather than leave it stuck in processing
        if let Err(release_err) = self.documents.release(&[document.id]).await {
            warn!(document_id = %document.id, error = %release_err, "Failed to release claim");
        }
        if e.is_conflict() {
            warn!(document_id = %document.id, "Document changed while processing, result discarded");
            return Ok(false);
        }
        Err(e)
    }
}

#[async_trait]
impl WorkHandler<Uuid> for ProcessorWorker {
    async fn handle(&self, cancel: &CancellationToken, id: Uuid) -> Result<()> {
        match self.process_document(cancel, id).await {
            Ok(status) => {
                self.metrics.documents_total.inc();
                debug!(document_id = %id, status = %status, "Processed document");
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                info!(document_id = %id, "Processing cancelled, document released");
                Err(e)
            }
            Err(e) => {
                self.metrics.errors_total.inc_for("storage");
                error!(document_id = %id, error = %e, "Failed to process document");
                Err(e)
            }
        }
    }

    async fn abandon(&self, ids: Vec<Uuid>) {
        match self.documents.release(&ids).await {
            Ok(released) => info!(released = released, "Released unprocessed claims"),
            Err(e) => error!(documents = ids.len(), error = %e, "Failed to release unprocessed claims"),
        }
    }
}
