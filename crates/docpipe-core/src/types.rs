use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

// Datasource configuration

/// Activation status of a configured datasource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceStatus {
    Active,
    Inactive,
}

impl DatasourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceStatus::Active => "active",
            DatasourceStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for DatasourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasourceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DatasourceStatus::Active),
            "inactive" => Ok(DatasourceStatus::Inactive),
            other => Err(CoreError::Validation(format!(
                "unknown datasource status: {}",
                other
            ))),
        }
    }
}

/// Persistent configuration of one datasource.
///
/// `settings` and `state` are opaque to the pipeline; the capability built
/// from this config by the datasource factory interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub id: Uuid,
    pub name: String,
    /// Source-type tag used to pick a constructor (e.g. `"slack"`)
    pub kind: String,
    pub settings: serde_json::Value,
    /// Cursor written back after each successful fetch
    pub state: serde_json::Value,
    pub status: DatasourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatasourceConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: kind.into(),
            settings: serde_json::Value::Object(Default::default()),
            state: serde_json::Value::Null,
            status: DatasourceStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_status(mut self, status: DatasourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == DatasourceStatus::Active
    }
}

// Documents

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    ReadyToSearch,
    ErrorProcessing,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::ReadyToSearch => "ready_to_search",
            DocumentStatus::ErrorProcessing => "error_processing",
        }
    }

    /// Whether the document has left the processing pipeline for this cycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::ReadyToSearch | DocumentStatus::ErrorProcessing
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "ready_to_search" => Ok(DocumentStatus::ReadyToSearch),
            "error_processing" => Ok(DocumentStatus::ErrorProcessing),
            other => Err(CoreError::Validation(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

/// One embedded fragment of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    pub text: String,
    pub vector: Vec<f32>,
    /// Embedding provider that generated the vector
    pub provider_id: Uuid,
    pub token_count: u32,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub content_parts: Vec<ContentPart>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub datasource_id: Option<Uuid>,
}

impl Document {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
            metadata: HashMap::new(),
            content_parts: Vec::new(),
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
            fetched_at: now,
            datasource_id: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_datasource(mut self, datasource_id: Uuid) -> Self {
        self.datasource_id = Some(datasource_id);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Text handed to enrichment units: title and body joined
    pub fn searchable_text(&self) -> String {
        if self.title.is_empty() {
            self.body.clone()
        } else if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }

    /// Drop every content part generated by `provider_id`
    pub fn clear_content_parts(&mut self, provider_id: Uuid) {
        self.content_parts.retain(|p| p.provider_id != provider_id);
    }
}

/// Output of one datasource fetch
#[derive(Debug, Clone, Default)]
pub struct DatasourceBatch {
    pub documents: Vec<Document>,
    /// Cursor to persist once every document is stored
    pub state: serde_json::Value,
}

impl DatasourceBatch {
    pub fn new(documents: Vec<Document>, state: serde_json::Value) -> Self {
        Self { documents, state }
    }
}

// Queries

/// Filter for document lookups and claims
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub ids: Option<Vec<Uuid>>,
    pub status: Option<DocumentStatus>,
    pub datasource_id: Option<Uuid>,
}

impl DocumentFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            ids: Some(vec![id]),
            ..Default::default()
        }
    }

    pub fn by_status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_datasource(mut self, datasource_id: Uuid) -> Self {
        self.datasource_id = Some(datasource_id);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&doc.id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if doc.status != status {
                return false;
            }
        }
        if let Some(datasource_id) = self.datasource_id {
            if doc.datasource_id != Some(datasource_id) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Pagination for document lookups (1-indexed pages)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub page: u32,
    pub per_page: u32,
    pub order: SortOrder,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
            order: SortOrder::Asc,
        }
    }
}

impl QueryOptions {
    pub fn limit(per_page: u32) -> Self {
        Self {
            per_page,
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.per_page)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaginatedDocuments {
    pub documents: Vec<Document>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl PaginatedDocuments {
    pub fn first(self) -> Option<Document> {
        self.documents.into_iter().next()
    }
}

// Embedding providers

/// Stored configuration of an embedding provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    pub id: Uuid,
    pub name: String,
    /// Provider family, e.g. `"openai"`
    pub kind: String,
    pub model: String,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub dimensions: Option<u32>,
    pub is_active: bool,
}

impl EmbeddingProviderConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: kind.into(),
            model: model.into(),
            base_url: None,
            api_key: None,
            dimensions: None,
            is_active: true,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// Vector returned by an embedder for one input text
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub token_count: u32,
}
