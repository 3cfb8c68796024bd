//! Core types, traits, and configuration shared by the docpipe crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

pub use traits::{
    Datasource, DatasourceStore, DocumentStore, Embedder, EmbeddingProviderStore, Identified,
    ProcessorUnit,
};

/// Re-exported so capability implementors don't need a direct dependency
pub use tokio_util::sync::CancellationToken;
