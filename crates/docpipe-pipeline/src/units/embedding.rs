use async_trait::async_trait;
use chrono::Utc;
use docpipe_core::{
    CancellationToken, ContentPart, CoreError, Document, Embedder, EmbeddingProviderConfig,
    Identified, ProcessorUnit, Result,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::chunking::TextChunker;

/// Inputs per embedding request
const EMBED_BATCH_SIZE: usize = 64;

/// Chunks a document and stores one vector per chunk as content parts.
///
/// Keyed by the embedding provider id; re-running replaces the parts this
/// provider generated earlier and leaves other providers' parts alone.
pub struct EmbeddingUnit {
    provider_id: Uuid,
    name: String,
    embedder: Arc<dyn Embedder>,
    chunker: TextChunker,
}

impl EmbeddingUnit {
    pub fn new(provider: &EmbeddingProviderConfig, embedder: Arc<dyn Embedder>, chunker: TextChunker) -> Self {
        Self {
            provider_id: provider.id,
            name: format!("embedding:{}", provider.name),
            embedder,
            chunker,
        }
    }
}

impl Identified for EmbeddingUnit {
    fn id(&self) -> Uuid {
        self.provider_id
    }
}

#[async_trait]
impl ProcessorUnit for EmbeddingUnit {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, cancel: &CancellationToken, document: &mut Document) -> Result<()> {
        let chunks = self.chunker.split(&document.searchable_text());

        let mut parts = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let embeddings = self.embedder.embed(batch).await?;
            if embeddings.len() != batch.len() {
                return Err(CoreError::Embedding(format!(
                    "embedder returned {} vectors for {} chunks",
                    embeddings.len(),
                    batch.len()
                )));
            }

            let generated_at = Utc::now();
            parts.extend(batch.iter().zip(embeddings).map(|(text, embedding)| ContentPart {
                text: text.clone(),
                vector: embedding.vector,
                provider_id: self.provider_id,
                token_count: embedding.token_count,
                generated_at,
            }));
        }

        document.clear_content_parts(self.provider_id);
        document.content_parts.extend(parts);

        debug!(
            document_id = %document.id,
            model = self.embedder.model(),
            parts = chunks.len(),
            "Embedded document"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpipe_core::Embedding;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model(&self) -> &str {
            "fake"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::Embedding("provider down".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| Embedding {
                    vector: vec![t.len() as f32],
                    token_count: 1,
                })
                .collect())
        }
    }

    fn new_unit(fail: bool) -> (EmbeddingUnit, Arc<FakeEmbedder>) {
        let embedder = Arc::new(FakeEmbedder {
            calls: AtomicUsize::new(0),
            fail,
        });
        let provider = EmbeddingProviderConfig::new("fake", "openai", "fake");
        let unit = EmbeddingUnit::new(&provider, embedder.clone(), TextChunker::new(5, 0).unwrap());
        (unit, embedder)
    }

    #[tokio::test]
    async fn test_replaces_own_parts_only() {
        let (unit, _) = new_unit(false);
        let other = Uuid::new_v4();
        let mut doc = Document::new("", "abcdefghij");
        doc.content_parts.push(ContentPart {
            text: "old".into(),
            vector: vec![0.0],
            provider_id: other,
            token_count: 1,
            generated_at: Utc::now(),
        });
        doc.content_parts.push(ContentPart {
            text: "stale".into(),
            vector: vec![0.0],
            provider_id: unit.id(),
            token_count: 1,
            generated_at: Utc::now(),
        });

        unit.process(&CancellationToken::new(), &mut doc).await.unwrap();

        let own: Vec<&str> = doc
            .content_parts
            .iter()
            .filter(|p| p.provider_id == unit.id())
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(own, vec!["abcde", "fghij"]);
        assert!(doc.content_parts.iter().any(|p| p.provider_id == other));
    }

    #[tokio::test]
    async fn test_failure_leaves_document_untouched() {
        let (unit, embedder) = new_unit(true);
        let mut doc = Document::new("title", "body");
        let before = doc.clone();

        let err = unit.process(&CancellationToken::new(), &mut doc).await.unwrap_err();

        assert!(matches!(err, CoreError::Embedding(_)));
        assert_eq!(doc, before);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_embedding() {
        let (unit, embedder) = new_unit(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = unit.process(&cancel, &mut Document::new("t", "b")).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_document_clears_parts_without_calls() {
        let (unit, embedder) = new_unit(false);
        let mut doc = Document::new("", "");

        unit.process(&CancellationToken::new(), &mut doc).await.unwrap();

        assert!(doc.content_parts.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }
}
