use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub collector: CollectorConfig,
    pub processor: ProcessorConfig,
    pub embedding: EmbeddingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("DOCPIPE")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("DOCPIPE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("database.url", "postgres://localhost/docpipe")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("collector.worker_count", 4)?
            .set_default("collector.interval_secs", 60)?
            .set_default("collector.registry_refresh_interval_secs", 300)?
            .set_default("collector.shutdown_timeout_secs", 30)?
            .set_default("collector.retry_attempts", 2)?
            .set_default("collector.retry_delay_ms", 1000)?
            .set_default("collector.retry_backoff", 2.0)?
            .set_default("collector.retry_max_delay_ms", 30_000)?
            .set_default("collector.retry_jitter", 0.3)?
            .set_default("collector.page_size", 100)?
            .set_default("processor.worker_count", 4)?
            .set_default("processor.batch_size", 50)?
            .set_default("processor.interval_secs", 30)?
            .set_default("processor.registry_refresh_interval_secs", 300)?
            .set_default("processor.shutdown_timeout_secs", 30)?
            .set_default("processor.retry_attempts", 1)?
            .set_default("processor.retry_delay_ms", 500)?
            .set_default("processor.retry_backoff", 2.0)?
            .set_default("processor.retry_max_delay_ms", 30_000)?
            .set_default("processor.retry_jitter", 0.0)?
            .set_default("embedding.chunk_size", 1000)?
            .set_default("embedding.chunk_overlap", 100)?
            .set_default("embedding.timeout_secs", 30)
    }

    /// Reject values that would stall or spin the pipelines
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collector.validate()?;
        self.processor.validate()?;
        self.embedding.validate()?;
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl DatabaseConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }

    pub fn with_pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Ingestion pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_collect_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub registry_refresh_interval_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_collector_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_collector_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Delay growth per retry; 1.0 keeps it fixed
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Random spread applied to each delay, 0.0 to 1.0
    #[serde(default = "default_collector_retry_jitter")]
    pub retry_jitter: f64,
    /// Page size used when loading datasource configs
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            interval_secs: default_collect_interval_secs(),
            registry_refresh_interval_secs: default_refresh_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            retry_attempts: default_collector_retry_attempts(),
            retry_delay_ms: default_collector_retry_delay_ms(),
            retry_backoff: default_retry_backoff(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: default_collector_retry_jitter(),
            page_size: default_page_size(),
        }
    }
}

impl CollectorConfig {
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn registry_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.registry_refresh_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Message("collector.worker_count must be > 0".into()));
        }
        if self.interval_secs == 0 || self.registry_refresh_interval_secs == 0 {
            return Err(ConfigError::Message("collector intervals must be > 0".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Message("collector.page_size must be > 0".into()));
        }
        validate_retry("collector", self.retry_backoff, self.retry_jitter)
    }
}

/// Enrichment pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_process_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub registry_refresh_interval_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_processor_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_processor_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Delay growth per retry; 1.0 keeps it fixed
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Random spread applied to each delay, 0.0 to 1.0
    #[serde(default = "default_processor_retry_jitter")]
    pub retry_jitter: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            interval_secs: default_process_interval_secs(),
            registry_refresh_interval_secs: default_refresh_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            retry_attempts: default_processor_retry_attempts(),
            retry_delay_ms: default_processor_retry_delay_ms(),
            retry_backoff: default_retry_backoff(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: default_processor_retry_jitter(),
        }
    }
}

impl ProcessorConfig {
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn registry_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.registry_refresh_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Message("processor.worker_count must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Message("processor.batch_size must be > 0".into()));
        }
        if self.interval_secs == 0 || self.registry_refresh_interval_secs == 0 {
            return Err(ConfigError::Message("processor intervals must be > 0".into()));
        }
        validate_retry("processor", self.retry_backoff, self.retry_jitter)
    }
}

/// Chunking and HTTP settings for embedding generation
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Maximum characters per embedded fragment
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunk_size = size;
        self.chunk_overlap = overlap;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Message("embedding.chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Message(
                "embedding.chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        Ok(())
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_collect_interval_secs() -> u64 {
    60
}

fn default_process_interval_secs() -> u64 {
    30
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_collector_retry_attempts() -> u32 {
    2
}

fn default_collector_retry_delay_ms() -> u64 {
    1000
}

fn default_processor_retry_attempts() -> u32 {
    1
}

fn default_processor_retry_delay_ms() -> u64 {
    500
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_collector_retry_jitter() -> f64 {
    0.3
}

fn default_processor_retry_jitter() -> f64 {
    0.0
}

fn validate_retry(section: &str, backoff: f64, jitter: f64) -> Result<(), ConfigError> {
    if backoff.is_nan() || backoff < 1.0 {
        return Err(ConfigError::Message(format!("{}.retry_backoff must be >= 1.0", section)));
    }
    if !(0.0..=1.0).contains(&jitter) {
        return Err(ConfigError::Message(format!(
            "{}.retry_jitter must be between 0.0 and 1.0",
            section
        )));
    }
    Ok(())
}

fn default_page_size() -> u32 {
    100
}

fn default_batch_size() -> u32 {
    50
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_creation() {
        let config = DatabaseConfig::new("postgres://localhost".to_string()).with_pool_size(5, 20);

        assert_eq!(config.url, "postgres://localhost");
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 20);
    }

    #[test]
    fn test_collector_defaults() {
        let config = CollectorConfig::default();

        assert_eq!(config.worker_count, 4);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.registry_refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.retry_delay(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_processor_builder() {
        let config = ProcessorConfig::default()
            .with_worker_count(8)
            .with_batch_size(10)
            .with_retry(0, Duration::from_millis(5));

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retry_attempts, 0);
        assert_eq!(config.retry_delay(), Duration::from_millis(5));
    }

    #[test]
    fn test_retry_shape_validated() {
        let config = CollectorConfig {
            retry_jitter: 1.5,
            ..CollectorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ProcessorConfig {
            retry_backoff: 0.5,
            ..ProcessorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ProcessorConfig::default();
        assert_eq!(config.retry_max_delay(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ProcessorConfig::default().with_worker_count(0);
        assert!(config.validate().is_err());

        let config = CollectorConfig::default().with_worker_count(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_embedding_overlap_must_be_smaller() {
        assert!(EmbeddingConfig::default().with_chunking(100, 100).validate().is_err());
        assert!(EmbeddingConfig::default().with_chunking(100, 10).validate().is_ok());
    }

    #[test]
    fn test_load_from_env_defaults() {
        let config = AppConfig::load_from_env("DOCPIPE_TEST_UNSET_PREFIX").unwrap();

        assert_eq!(config.database.url, "postgres://localhost/docpipe");
        assert_eq!(config.processor.batch_size, 50);
        assert_eq!(config.collector.page_size, 100);
        assert_eq!(config.embedding.chunk_size, 1000);
    }
}
