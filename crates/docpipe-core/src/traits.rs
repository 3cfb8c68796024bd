//! Storage contracts and pluggable capabilities.
//!
//! The pipelines only talk to durable state and to external sources through
//! these traits. `docpipe-infra` provides Postgres and in-memory stores; the
//! datasource and processor-unit implementations are produced by factories at
//! registry refresh time.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    DatasourceBatch, DatasourceConfig, Document, DocumentFilter, Embedding,
    EmbeddingProviderConfig, PaginatedDocuments, QueryOptions,
};

/// Anything a registry can hold: it must expose a stable identity.
pub trait Identified: Send + Sync {
    fn id(&self) -> Uuid;
}

/// Ingestion capability built from a [`DatasourceConfig`].
#[async_trait]
pub trait Datasource: Identified {
    /// Source-type tag this instance was built for
    fn kind(&self) -> &str;

    /// Fetch new documents since `state`, returning them with the advanced cursor.
    ///
    /// Long-running fetches should observe `cancel` and return
    /// [`CoreError::Cancelled`](crate::CoreError::Cancelled) when it fires.
    async fn get_data(
        &self,
        cancel: &CancellationToken,
        state: &serde_json::Value,
    ) -> Result<DatasourceBatch>;

    /// Check that the settings this instance was built from are usable
    fn validate(&self) -> Result<()>;
}

/// Enrichment capability that mutates a document in place.
#[async_trait]
pub trait ProcessorUnit: Identified {
    fn name(&self) -> &str;

    async fn process(&self, cancel: &CancellationToken, document: &mut Document) -> Result<()>;
}

/// Generates vectors for text fragments.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    /// Embed `texts`, returning one [`Embedding`] per input in the same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

#[async_trait]
pub trait DatasourceStore: Send + Sync {
    /// Page through all datasource configs (1-indexed pages)
    async fn get_all_datasources(&self, page: u32, per_page: u32) -> Result<Vec<DatasourceConfig>>;

    async fn get_datasource(&self, id: Uuid) -> Result<Option<DatasourceConfig>>;

    async fn update_datasource(
        &self,
        id: Uuid,
        settings: &serde_json::Value,
        state: &serde_json::Value,
    ) -> Result<()>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document.
    ///
    /// The stored status becomes `pending`, except for a claimed document:
    /// it stays `processing` with a new `updated_at`, so the claimant's
    /// `update` fails with `Conflict` and no second claim is possible.
    async fn insert(&self, document: &Document) -> Result<()>;

    async fn get(&self, filter: &DocumentFilter, options: QueryOptions) -> Result<PaginatedDocuments>;

    /// Atomically claim up to `batch_limit` matching documents, oldest first,
    /// moving them to `processing`. Concurrent claims never overlap.
    async fn get_for_processing(&self, filter: &DocumentFilter, batch_limit: u32) -> Result<Vec<Uuid>>;

    /// Persist status, metadata and content parts of a claimed document.
    ///
    /// Succeeds only while the row is `processing` and its `updated_at`
    /// still equals the one read after the claim; otherwise `Conflict`.
    async fn update(&self, document: &Document) -> Result<()>;

    /// Return claimed (`processing`) documents to `pending`
    async fn release(&self, ids: &[Uuid]) -> Result<u64>;
}

#[async_trait]
pub trait EmbeddingProviderStore: Send + Sync {
    async fn active_provider(&self) -> Result<Option<EmbeddingProviderConfig>>;
}
