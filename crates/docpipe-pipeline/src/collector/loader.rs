use async_trait::async_trait;
use docpipe_core::{Datasource, DatasourceStore};
use std::sync::Arc;
use tracing::{debug, error};

use super::factory::DatasourceFactory;
use crate::registry::RegistryLoader;

/// Builds the collector registry from every active datasource config.
///
/// Configs that cannot be built or fail validation are logged and skipped.
pub struct DatasourceLoader {
    store: Arc<dyn DatasourceStore>,
    factory: Arc<DatasourceFactory>,
    page_size: u32,
}

impl DatasourceLoader {
    pub fn new(store: Arc<dyn DatasourceStore>, factory: Arc<DatasourceFactory>, page_size: u32) -> Self {
        Self {
            store,
            factory,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl RegistryLoader<dyn Datasource> for DatasourceLoader {
    async fn load(&self) -> docpipe_core::Result<Vec<Arc<dyn Datasource>>> {
        let mut datasources = Vec::new();
        let mut skipped = 0usize;
        let mut page = 1;

        loop {
            let configs = self.store.get_all_datasources(page, self.page_size).await?;
            let last_page = configs.len() < self.page_size as usize;

            for config in configs.into_iter().filter(|c| c.is_active()) {
                let datasource = match self.factory.build(&config) {
                    Ok(datasource) => datasource,
                    Err(e) => {
                        error!(datasource_id = %config.id, kind = %config.kind, error = %e, "Failed to build datasource");
                        skipped += 1;
                        continue;
                    }
                };

                if let Err(e) = datasource.validate() {
                    error!(datasource_id = %config.id, kind = %config.kind, error = %e, "Datasource failed validation");
                    skipped += 1;
                    continue;
                }

                datasources.push(datasource);
            }

            if last_page {
                break;
            }
            page += 1;
        }

        debug!(loaded = datasources.len(), skipped = skipped, "Loaded datasources");
        Ok(datasources)
    }
}
