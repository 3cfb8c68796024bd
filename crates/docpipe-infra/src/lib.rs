pub mod database;
pub mod embedding;
pub mod memory;
pub mod metrics;
pub mod resilience;

pub use database::{
    migrations::{rollback_migrations, run_migrations, Migration},
    pool::{create_pool, PgPoolConfig},
    repositories::{PgDatasourceStore, PgDocumentStore, PgEmbeddingProviderStore},
};

pub use embedding::{EmbedderFactory, OpenAiEmbedder, OpenAiEmbedderFactory};

pub use memory::{InMemoryDatasourceStore, InMemoryDocumentStore, InMemoryEmbeddingProviderStore};

pub use metrics::{
    Counter, Histogram, Meter, MetricsConfig, MetricsError, MetricsRegistry, UpDownCounter,
};

pub use resilience::{retry_with_cancel, RetryPolicy};

use docpipe_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, InfraError>;

impl From<InfraError> for CoreError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Database(e) => CoreError::Storage(e.to_string()),
            InfraError::Migration(msg) => CoreError::Storage(msg),
            InfraError::Http(e) => CoreError::Embedding(e.to_string()),
            InfraError::Metrics(e) => CoreError::Configuration(e.to_string()),
            InfraError::Serialization(e) => CoreError::Serialization(e),
            InfraError::Configuration(msg) => CoreError::Configuration(msg),
            InfraError::NotFound(msg) => CoreError::NotFound(msg),
            InfraError::Conflict(msg) => CoreError::Conflict(msg),
        }
    }
}
