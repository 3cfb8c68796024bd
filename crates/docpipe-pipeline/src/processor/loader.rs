use async_trait::async_trait;
use docpipe_core::{EmbeddingConfig, EmbeddingProviderStore, ProcessorUnit};
use docpipe_infra::EmbedderFactory;
use std::sync::Arc;
use tracing::debug;

use crate::registry::RegistryLoader;
use crate::units::{EmbeddingUnit, TextChunker};

/// Builds the processor registry from the active embedding provider.
///
/// No active provider means an empty registry. A provider that cannot be
/// built fails the load, so the previous units stay registered.
pub struct EmbeddingUnitLoader {
    providers: Arc<dyn EmbeddingProviderStore>,
    factory: Arc<dyn EmbedderFactory>,
    chunking: EmbeddingConfig,
}

impl EmbeddingUnitLoader {
    pub fn new(
        providers: Arc<dyn EmbeddingProviderStore>,
        factory: Arc<dyn EmbedderFactory>,
        chunking: EmbeddingConfig,
    ) -> Self {
        Self {
            providers,
            factory,
            chunking,
        }
    }
}

#[async_trait]
impl RegistryLoader<dyn ProcessorUnit> for EmbeddingUnitLoader {
    async fn load(&self) -> docpipe_core::Result<Vec<Arc<dyn ProcessorUnit>>> {
        let Some(provider) = self.providers.active_provider().await? else {
            debug!("No active embedding provider");
            return Ok(Vec::new());
        };

        let embedder = self.factory.build(&provider)?;
        let chunker = TextChunker::from_config(&self.chunking)?;
        debug!(provider_id = %provider.id, model = %provider.model, "Loaded embedding provider");

        Ok(vec![Arc::new(EmbeddingUnit::new(&provider, embedder, chunker)) as Arc<dyn ProcessorUnit>])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpipe_core::{CoreError, Embedder, Embedding, EmbeddingProviderConfig, Identified};
    use docpipe_infra::InMemoryEmbeddingProviderStore;

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        fn model(&self) -> &str {
            "null"
        }

        async fn embed(&self, texts: &[String]) -> docpipe_core::Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .map(|_| Embedding {
                    vector: vec![0.0],
                    token_count: 0,
                })
                .collect())
        }
    }

    struct KindFactory;

    impl EmbedderFactory for KindFactory {
        fn build(&self, provider: &EmbeddingProviderConfig) -> docpipe_core::Result<Arc<dyn Embedder>> {
            match provider.kind.as_str() {
                "null" => Ok(Arc::new(NullEmbedder)),
                other => Err(CoreError::Configuration(format!("unknown provider kind {}", other))),
            }
        }
    }

    fn loader(store: Arc<InMemoryEmbeddingProviderStore>) -> EmbeddingUnitLoader {
        EmbeddingUnitLoader::new(store, Arc::new(KindFactory), EmbeddingConfig::default())
    }

    #[tokio::test]
    async fn test_no_active_provider_loads_nothing() {
        let store = Arc::new(InMemoryEmbeddingProviderStore::new());
        assert!(loader(store).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_provider_becomes_one_unit() {
        let store = Arc::new(InMemoryEmbeddingProviderStore::new());
        let provider = EmbeddingProviderConfig::new("local", "null", "null-1");
        store.save(provider.clone()).await;

        let units = loader(store).load().await.unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id(), provider.id);
        assert_eq!(units[0].name(), "embedding:local");
    }

    #[tokio::test]
    async fn test_unbuildable_provider_fails_load() {
        let store = Arc::new(InMemoryEmbeddingProviderStore::new());
        store
            .save(EmbeddingProviderConfig::new("remote", "mystery", "m"))
            .await;

        let err = loader(store).load().await.err().unwrap();
        assert!(matches!(err, CoreError::Configuration(_)));
    }
}
