use thiserror::Error;

/// Errors surfaced across the storage and capability boundaries
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported datasource type: {0}")]
    UnsupportedDatasource(String),

    #[error("Datasource error: {0}")]
    Datasource(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        CoreError::Storage(msg.into())
    }

    pub fn datasource(msg: impl Into<String>) -> Self {
        CoreError::Datasource(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        CoreError::Processing(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
