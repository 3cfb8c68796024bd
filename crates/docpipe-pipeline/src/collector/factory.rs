//! Type-keyed datasource constructors

use docpipe_core::{CoreError, Datasource, DatasourceConfig, Result};
use std::collections::HashMap;
use std::sync::Arc;

use super::filesystem::FilesystemDatasource;

pub type DatasourceConstructor =
    dyn Fn(&DatasourceConfig) -> Result<Arc<dyn Datasource>> + Send + Sync;

/// Maps a datasource `kind` to the constructor that builds it
#[derive(Clone, Default)]
pub struct DatasourceFactory {
    constructors: HashMap<String, Arc<DatasourceConstructor>>,
}

impl DatasourceFactory {
    /// An empty factory; every kind is unsupported until registered
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory preloaded with the kinds shipped in this crate
    pub fn with_builtin() -> Self {
        Self::new().with(FilesystemDatasource::KIND, |config| {
            Ok(Arc::new(FilesystemDatasource::from_config(config)?) as Arc<dyn Datasource>)
        })
    }

    pub fn with<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&DatasourceConfig) -> Result<Arc<dyn Datasource>> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Add or replace the constructor for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&DatasourceConfig) -> Result<Arc<dyn Datasource>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build(&self, config: &DatasourceConfig) -> Result<Arc<dyn Datasource>> {
        let constructor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| CoreError::UnsupportedDatasource(config.kind.clone()))?;
        constructor(config)
    }
}
