//! OpenAI-compatible embedding client
//!
//! Sends `POST {base_url}/embeddings` with a batch of inputs and returns the
//! vectors in input order. Works against OpenAI and any server exposing the
//! same API shape.

use async_trait::async_trait;
use docpipe_core::{CoreError, Embedder, Embedding, EmbeddingProviderConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::InfraError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Builds an [`Embedder`] from a stored provider config
pub trait EmbedderFactory: Send + Sync {
    fn build(&self, provider: &EmbeddingProviderConfig) -> docpipe_core::Result<Arc<dyn Embedder>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
}

/// Embedder for the OpenAI embeddings API
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<u32>,
}

impl OpenAiEmbedder {
    pub fn new(provider: &EmbeddingProviderConfig, timeout: Duration) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = provider
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key: provider.api_key.clone(),
            model: provider.model.clone(),
            dimensions: provider.dimensions,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<EmbeddingResponse, CoreError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(InfraError::from)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::Embedding(format!(
                "embedding API error {}: {}",
                status, text
            )));
        }

        Ok(response
            .json::<EmbeddingResponse>()
            .await
            .map_err(InfraError::from)?)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> docpipe_core::Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.request(texts).await?;
        if response.data.len() != texts.len() {
            return Err(CoreError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);

        // usage is reported per request; it is exact only for a single input
        let single_usage = match (&response.usage, texts.len()) {
            (Some(usage), 1) => Some(usage.prompt_tokens),
            _ => None,
        };

        debug!(model = %self.model, inputs = texts.len(), "Generated embeddings");

        Ok(data
            .into_iter()
            .zip(texts)
            .map(|(d, text)| Embedding {
                vector: d.embedding,
                token_count: single_usage.unwrap_or_else(|| estimate_tokens(text)),
            })
            .collect())
    }
}

/// Rough token estimate: four characters per token
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    (chars + 3) / 4
}

/// Factory for `openai` and `openai_compatible` providers
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderFactory {
    timeout: Duration,
}

impl OpenAiEmbedderFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for OpenAiEmbedderFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl EmbedderFactory for OpenAiEmbedderFactory {
    fn build(&self, provider: &EmbeddingProviderConfig) -> docpipe_core::Result<Arc<dyn Embedder>> {
        match provider.kind.as_str() {
            "openai" | "openai_compatible" => {
                Ok(Arc::new(OpenAiEmbedder::new(provider, self.timeout)?))
            }
            other => Err(CoreError::Configuration(format!(
                "unsupported embedding provider kind: {}",
                other
            ))),
        }
    }
}
