use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docpipe_core::{DatasourceConfig, DatasourceStatus, DatasourceStore};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::decode_error;
use crate::{InfraError, Result};

/// Datasource configs backed by the `datasources` table
#[derive(Clone)]
pub struct PgDatasourceStore {
    pool: PgPool,
}

impl PgDatasourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a datasource config
    pub async fn save(&self, config: &DatasourceConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO datasources (id, name, kind, settings, state, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                settings = EXCLUDED.settings,
                state = EXCLUDED.state,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(config.id)
        .bind(&config.name)
        .bind(&config.kind)
        .bind(Json(&config.settings))
        .bind(Json(&config.state))
        .bind(config.status.as_str())
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, page: u32, per_page: u32) -> Result<Vec<DatasourceConfig>> {
        let offset = i64::from(page.max(1) - 1) * i64::from(per_page);
        let rows = sqlx::query(
            r#"
            SELECT id, name, kind, settings, state, status, created_at, updated_at
            FROM datasources
            ORDER BY created_at, id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(datasource_from_row).collect()
    }

    async fn find(&self, id: Uuid) -> Result<Option<DatasourceConfig>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, settings, state, status, created_at, updated_at
            FROM datasources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(datasource_from_row).transpose()
    }

    async fn write_state(
        &self,
        id: Uuid,
        settings: &serde_json::Value,
        state: &serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE datasources SET settings = $2, state = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(Json(settings))
        .bind(Json(state))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::NotFound(format!("datasource {}", id)));
        }
        Ok(())
    }
}

fn datasource_from_row(row: &PgRow) -> Result<DatasourceConfig> {
    let status: String = row.try_get("status")?;
    let Json(settings): Json<serde_json::Value> = row.try_get("settings")?;
    let Json(state): Json<serde_json::Value> = row.try_get("state")?;

    Ok(DatasourceConfig {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        settings,
        state,
        status: status
            .parse::<DatasourceStatus>()
            .map_err(decode_error)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl DatasourceStore for PgDatasourceStore {
    async fn get_all_datasources(
        &self,
        page: u32,
        per_page: u32,
    ) -> docpipe_core::Result<Vec<DatasourceConfig>> {
        Ok(self.list(page, per_page).await?)
    }

    async fn get_datasource(&self, id: Uuid) -> docpipe_core::Result<Option<DatasourceConfig>> {
        Ok(self.find(id).await?)
    }

    async fn update_datasource(
        &self,
        id: Uuid,
        settings: &serde_json::Value,
        state: &serde_json::Value,
    ) -> docpipe_core::Result<()> {
        Ok(self.write_state(id, settings, state).await?)
    }
}
