//! In-memory store implementations
//!
//! Same contracts as the Postgres stores, held in process memory. Used for
//! tests and local runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docpipe_core::{
    CoreError, DatasourceConfig, DatasourceStore, Document, DocumentFilter, DocumentStatus,
    DocumentStore, EmbeddingProviderConfig, EmbeddingProviderStore, PaginatedDocuments,
    QueryOptions, Result, SortOrder,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory datasource configs
#[derive(Default)]
pub struct InMemoryDatasourceStore {
    datasources: RwLock<HashMap<Uuid, DatasourceConfig>>,
}

impl InMemoryDatasourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, config: DatasourceConfig) {
        self.datasources.write().await.insert(config.id, config);
    }

    pub async fn remove(&self, id: Uuid) -> Option<DatasourceConfig> {
        self.datasources.write().await.remove(&id)
    }
}

#[async_trait]
impl DatasourceStore for InMemoryDatasourceStore {
    async fn get_all_datasources(&self, page: u32, per_page: u32) -> Result<Vec<DatasourceConfig>> {
        let datasources = self.datasources.read().await;
        let mut all: Vec<&DatasourceConfig> = datasources.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let offset = (page.max(1) - 1) as usize * per_page as usize;
        Ok(all
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    async fn get_datasource(&self, id: Uuid) -> Result<Option<DatasourceConfig>> {
        Ok(self.datasources.read().await.get(&id).cloned())
    }

    async fn update_datasource(
        &self,
        id: Uuid,
        settings: &serde_json::Value,
        state: &serde_json::Value,
    ) -> Result<()> {
        let mut datasources = self.datasources.write().await;
        let config = datasources
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("datasource {}", id)))?;

        config.settings = settings.clone();
        config.state = state.clone();
        config.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory documents
///
/// Claims take the write lock for the whole select-and-flip, so concurrent
/// claims never return the same document.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored document, oldest first
    pub async fn all(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.documents.read().await.values().cloned().collect();
        sort_documents(&mut documents, SortOrder::Asc);
        documents
    }

    pub async fn find(&self, id: Uuid) -> Option<Document> {
        self.documents.read().await.get(&id).cloned()
    }

    pub async fn count_with_status(&self, status: DocumentStatus) -> usize {
        self.documents
            .read()
            .await
            .values()
            .filter(|d| d.status == status)
            .count()
    }
}

/// `updated_at` doubles as the revision, so it must move on every rewrite
fn next_revision(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous + chrono::Duration::microseconds(1))
}

fn sort_documents(documents: &mut [Document], order: SortOrder) {
    documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    if order == SortOrder::Desc {
        documents.reverse();
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, document: &Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        let mut stored = document.clone();
        stored.status = DocumentStatus::Pending;
        stored.updated_at = Utc::now();
        if let Some(existing) = documents.get(&document.id) {
            stored.created_at = existing.created_at;
            stored.updated_at = next_revision(existing.updated_at);
            // an active claim keeps the row; its holder loses on update
            if existing.status == DocumentStatus::Processing {
                stored.status = DocumentStatus::Processing;
            }
        }
        documents.insert(stored.id, stored);
        Ok(())
    }

    async fn get(&self, filter: &DocumentFilter, options: QueryOptions) -> Result<PaginatedDocuments> {
        let mut matching: Vec<Document> = self
            .documents
            .read()
            .await
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        sort_documents(&mut matching, options.order);

        let total = matching.len() as u64;
        let documents = matching
            .into_iter()
            .skip(options.offset() as usize)
            .take(options.per_page as usize)
            .collect();

        Ok(PaginatedDocuments {
            documents,
            total,
            page: options.page.max(1),
            per_page: options.per_page,
        })
    }

    async fn get_for_processing(&self, filter: &DocumentFilter, batch_limit: u32) -> Result<Vec<Uuid>> {
        let filter = DocumentFilter {
            status: Some(filter.status.unwrap_or(DocumentStatus::Pending)),
            ..filter.clone()
        };

        let mut documents = self.documents.write().await;
        let mut candidates: Vec<&Document> = documents.values().filter(|d| filter.matches(d)).collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let ids: Vec<Uuid> = candidates
            .into_iter()
            .take(batch_limit as usize)
            .map(|d| d.id)
            .collect();

        let now = Utc::now();
        for id in &ids {
            if let Some(doc) = documents.get_mut(id) {
                doc.status = DocumentStatus::Processing;
                doc.updated_at = now;
            }
        }
        Ok(ids)
    }

    async fn update(&self, document: &Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        let stored = documents
            .get_mut(&document.id)
            .ok_or_else(|| CoreError::NotFound(format!("document {}", document.id)))?;
        if stored.status != DocumentStatus::Processing || stored.updated_at != document.updated_at {
            return Err(CoreError::Conflict(format!(
                "document {} is no longer claimed at this revision",
                document.id
            )));
        }

        stored.title = document.title.clone();
        stored.body = document.body.clone();
        stored.metadata = document.metadata.clone();
        stored.content_parts = document.content_parts.clone();
        stored.status = document.status;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64> {
        let mut documents = self.documents.write().await;
        let now = Utc::now();
        let mut released = 0;
        for id in ids {
            if let Some(doc) = documents.get_mut(id) {
                if doc.status == DocumentStatus::Processing {
                    doc.status = DocumentStatus::Pending;
                    doc.updated_at = now;
                    released += 1;
                }
            }
        }
        Ok(released)
    }
}

/// In-memory embedding provider configs
#[derive(Default)]
pub struct InMemoryEmbeddingProviderStore {
    providers: RwLock<Vec<EmbeddingProviderConfig>>,
}

impl InMemoryEmbeddingProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a provider; activating it deactivates every other provider
    pub async fn save(&self, provider: EmbeddingProviderConfig) {
        let mut providers = self.providers.write().await;
        if provider.is_active {
            for p in providers.iter_mut() {
                p.is_active = false;
            }
        }
        providers.retain(|p| p.id != provider.id);
        providers.push(provider);
    }

    pub async fn deactivate_all(&self) {
        for p in self.providers.write().await.iter_mut() {
            p.is_active = false;
        }
    }
}

#[async_trait]
impl EmbeddingProviderStore for InMemoryEmbeddingProviderStore {
    async fn active_provider(&self) -> Result<Option<EmbeddingProviderConfig>> {
        Ok(self
            .providers
            .read()
            .await
            .iter()
            .find(|p| p.is_active)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn seed(store: &InMemoryDocumentStore, n: usize) -> Vec<Uuid> {
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..n {
            let doc = Document::new(format!("doc {}", i), "body")
                .with_created_at(base + Duration::milliseconds(i as i64));
            ids.push(doc.id);
            store.insert(&doc).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn test_insert_resets_status_to_pending() {
        let store = InMemoryDocumentStore::new();
        let mut doc = Document::new("t", "b");
        doc.status = DocumentStatus::ReadyToSearch;
        store.insert(&doc).await.unwrap();

        assert_eq!(store.find(doc.id).await.unwrap().status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn test_claim_is_oldest_first_and_flips_status() {
        let store = InMemoryDocumentStore::new();
        let ids = seed(&store, 5).await;

        let claimed = store
            .get_for_processing(&DocumentFilter::by_status(DocumentStatus::Pending), 3)
            .await
            .unwrap();

        assert_eq!(claimed, ids[..3].to_vec());
        assert_eq!(store.count_with_status(DocumentStatus::Processing).await, 3);
        assert_eq!(store.count_with_status(DocumentStatus::Pending).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let store = Arc::new(InMemoryDocumentStore::new());
        seed(&store, 100).await;

        let filter = DocumentFilter::by_status(DocumentStatus::Pending);
        let (a, b) = tokio::join!(
            store.get_for_processing(&filter, 50),
            store.get_for_processing(&filter, 50)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let all: HashSet<Uuid> = a.iter().chain(b.iter()).copied().collect();
        assert_eq!(a.len(), 50);
        assert_eq!(b.len(), 50);
        assert_eq!(all.len(), 100);
    }

    #[tokio::test]
    async fn test_release_only_touches_processing() {
        let store = InMemoryDocumentStore::new();
        let ids = seed(&store, 2).await;
        store
            .get_for_processing(&DocumentFilter::by_id(ids[0]), 10)
            .await
            .unwrap();

        let released = store.release(&ids).await.unwrap();

        assert_eq!(released, 1);
        assert_eq!(store.count_with_status(DocumentStatus::Pending).await, 2);
    }

    #[tokio::test]
    async fn test_reinsert_under_claim_is_not_claimed_twice() {
        let store = InMemoryDocumentStore::new();
        let doc = Document::new("title", "old body");
        store.insert(&doc).await.unwrap();
        let pending = DocumentFilter::by_status(DocumentStatus::Pending);

        let first = store.get_for_processing(&pending, 10).await.unwrap();
        assert_eq!(first, vec![doc.id]);
        let claimed = store.find(doc.id).await.unwrap();

        let mut changed = doc.clone();
        changed.body = "new body".to_string();
        store.insert(&changed).await.unwrap();

        let second = store.get_for_processing(&pending, 10).await.unwrap();
        assert!(second.is_empty());

        let mut stale = claimed;
        stale.status = DocumentStatus::ReadyToSearch;
        let err = store.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.find(doc.id).await.unwrap();
        assert_eq!(stored.body, "new body");
        assert_eq!(stored.status, DocumentStatus::Processing);

        assert_eq!(store.release(&[doc.id]).await.unwrap(), 1);
        assert_eq!(store.get_for_processing(&pending, 10).await.unwrap(), vec![doc.id]);
    }

    #[tokio::test]
    async fn test_update_requires_active_claim() {
        let store = InMemoryDocumentStore::new();
        let doc = Document::new("t", "b");
        store.insert(&doc).await.unwrap();

        let unclaimed = store.find(doc.id).await.unwrap();
        assert!(store.update(&unclaimed).await.unwrap_err().is_conflict());

        store
            .get_for_processing(&DocumentFilter::by_id(doc.id), 1)
            .await
            .unwrap();
        let mut claimed = store.find(doc.id).await.unwrap();
        claimed.status = DocumentStatus::ReadyToSearch;
        store.update(&claimed).await.unwrap();

        assert_eq!(store.find(doc.id).await.unwrap().status, DocumentStatus::ReadyToSearch);
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = InMemoryDocumentStore::new();
        let err = store.update(&Document::new("t", "b")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_paginates() {
        let store = InMemoryDocumentStore::new();
        let ids = seed(&store, 5).await;

        let page = store
            .get(&DocumentFilter::default(), QueryOptions::limit(2).with_page(2))
            .await
            .unwrap();

        assert_eq!(page.total, 5);
        let got: Vec<Uuid> = page.documents.iter().map(|d| d.id).collect();
        assert_eq!(got, ids[2..4].to_vec());
    }

    #[tokio::test]
    async fn test_datasource_pages_and_update() {
        let store = InMemoryDatasourceStore::new();
        let base = Utc::now();
        for i in 0..3 {
            let mut config = DatasourceConfig::new(format!("ds{}", i), "static");
            config.created_at = base + Duration::milliseconds(i);
            store.save(config).await;
        }

        let first = store.get_all_datasources(1, 2).await.unwrap();
        let second = store.get_all_datasources(2, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "ds2");

        let id = first[0].id;
        store
            .update_datasource(id, &serde_json::json!({}), &serde_json::json!({"cursor": 7}))
            .await
            .unwrap();
        let updated = store.get_datasource(id).await.unwrap().unwrap();
        assert_eq!(updated.state, serde_json::json!({"cursor": 7}));
    }

    #[tokio::test]
    async fn test_single_active_provider() {
        let store = InMemoryEmbeddingProviderStore::new();
        assert!(store.active_provider().await.unwrap().is_none());

        let first = EmbeddingProviderConfig::new("a", "openai", "m1");
        let second = EmbeddingProviderConfig::new("b", "openai", "m2");
        store.save(first).await;
        store.save(second.clone()).await;

        assert_eq!(store.active_provider().await.unwrap().unwrap().id, second.id);

        store.deactivate_all().await;
        assert!(store.active_provider().await.unwrap().is_none());
    }
}
