use async_trait::async_trait;
use docpipe_core::{EmbeddingProviderConfig, EmbeddingProviderStore};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::Result;

/// Embedding provider configs backed by the `embedding_providers` table
#[derive(Clone)]
pub struct PgEmbeddingProviderStore {
    pool: PgPool,
}

impl PgEmbeddingProviderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a provider; activating it deactivates every other provider
    pub async fn save(&self, provider: &EmbeddingProviderConfig) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if provider.is_active {
            sqlx::query("UPDATE embedding_providers SET is_active = false WHERE id <> $1")
                .bind(provider.id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO embedding_providers (id, name, kind, model, base_url, api_key, dimensions, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                model = EXCLUDED.model,
                base_url = EXCLUDED.base_url,
                api_key = EXCLUDED.api_key,
                dimensions = EXCLUDED.dimensions,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(provider.id)
        .bind(&provider.name)
        .bind(&provider.kind)
        .bind(&provider.model)
        .bind(&provider.base_url)
        .bind(&provider.api_key)
        .bind(provider.dimensions.map(|d| d as i32))
        .bind(provider.is_active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_active(&self) -> Result<Option<EmbeddingProviderConfig>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, model, base_url, api_key, dimensions, is_active
            FROM embedding_providers
            WHERE is_active
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(provider_from_row).transpose()?)
    }
}

fn provider_from_row(row: &PgRow) -> std::result::Result<EmbeddingProviderConfig, sqlx::Error> {
    Ok(EmbeddingProviderConfig {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        model: row.try_get("model")?,
        base_url: row.try_get("base_url")?,
        api_key: row.try_get("api_key")?,
        dimensions: row
            .try_get::<Option<i32>, _>("dimensions")?
            .map(|d| d as u32),
        is_active: row.try_get("is_active")?,
    })
}

#[async_trait]
impl EmbeddingProviderStore for PgEmbeddingProviderStore {
    async fn active_provider(&self) -> docpipe_core::Result<Option<EmbeddingProviderConfig>> {
        Ok(self.find_active().await?)
    }
}
