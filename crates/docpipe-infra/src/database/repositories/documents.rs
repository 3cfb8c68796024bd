use async_trait::async_trait;
use docpipe_core::{
    ContentPart, Document, DocumentFilter, DocumentStatus, DocumentStore, PaginatedDocuments,
    QueryOptions, SortOrder,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::decode_error;
use crate::{InfraError, Result};

/// Documents and their content parts
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(&self, document: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, title, body, metadata, status, datasource_id, created_at, updated_at, fetched_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, now(), $7)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                body = EXCLUDED.body,
                metadata = EXCLUDED.metadata,
                status = CASE WHEN documents.status = 'processing' THEN 'processing' ELSE 'pending' END,
                datasource_id = EXCLUDED.datasource_id,
                updated_at = GREATEST(now(), documents.updated_at + interval '1 microsecond'),
                fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(document.id)
        .bind(&document.title)
        .bind(&document.body)
        .bind(Json(&document.metadata))
        .bind(document.datasource_id)
        .bind(document.created_at)
        .bind(document.fetched_at)
        .execute(&mut *tx)
        .await?;

        replace_content_parts(&mut tx, document).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save(&self, document: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET title = $2, body = $3, metadata = $4, status = $5, updated_at = now()
            WHERE id = $1 AND status = 'processing' AND updated_at = $6
            "#,
        )
        .bind(document.id)
        .bind(&document.title)
        .bind(&document.body)
        .bind(Json(&document.metadata))
        .bind(document.status.as_str())
        .bind(document.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM documents WHERE id = $1)")
                .bind(document.id)
                .fetch_one(&mut *tx)
                .await?;
            return Err(if exists {
                InfraError::Conflict(format!(
                    "document {} is no longer claimed at this revision",
                    document.id
                ))
            } else {
                InfraError::NotFound(format!("document {}", document.id))
            });
        }

        replace_content_parts(&mut tx, document).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, filter: &DocumentFilter, options: QueryOptions) -> Result<PaginatedDocuments> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM documents");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT id, title, body, metadata, status, datasource_id, created_at, updated_at, fetched_at FROM documents",
        );
        push_filter(&mut select, filter);
        select.push(match options.order {
            SortOrder::Asc => " ORDER BY created_at ASC, id ASC",
            SortOrder::Desc => " ORDER BY created_at DESC, id DESC",
        });
        select.push(" LIMIT ");
        select.push_bind(i64::from(options.per_page));
        select.push(" OFFSET ");
        select.push_bind(options.offset() as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let mut documents = rows.iter().map(document_from_row).collect::<Result<Vec<_>>>()?;
        self.attach_content_parts(&mut documents).await?;

        Ok(PaginatedDocuments {
            documents,
            total: total.max(0) as u64,
            page: options.page.max(1),
            per_page: options.per_page,
        })
    }

    async fn attach_content_parts(&self, documents: &mut [Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = documents.iter().map(|d| d.id).collect();
        let rows = sqlx::query(
            r#"
            SELECT document_id, text, vector, provider_id, token_count, generated_at
            FROM document_content_parts
            WHERE document_id = ANY($1)
            ORDER BY document_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut parts: HashMap<Uuid, Vec<ContentPart>> = HashMap::new();
        for row in &rows {
            let document_id: Uuid = row.try_get("document_id")?;
            parts.entry(document_id).or_default().push(ContentPart {
                text: row.try_get("text")?,
                vector: row.try_get("vector")?,
                provider_id: row.try_get("provider_id")?,
                token_count: row.try_get::<i32, _>("token_count")?.max(0) as u32,
                generated_at: row.try_get("generated_at")?,
            });
        }

        for document in documents.iter_mut() {
            document.content_parts = parts.remove(&document.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn claim(&self, filter: &DocumentFilter, batch_limit: u32) -> Result<Vec<Uuid>> {
        if batch_limit == 0 {
            return Ok(Vec::new());
        }

        // Rows locked by a concurrent claim are skipped, never waited on
        let mut claim = QueryBuilder::<Postgres>::new(
            "UPDATE documents SET status = 'processing', updated_at = now() \
             WHERE id IN (SELECT id FROM documents",
        );
        let filter = DocumentFilter {
            status: Some(filter.status.unwrap_or(DocumentStatus::Pending)),
            ..filter.clone()
        };
        push_filter(&mut claim, &filter);
        claim.push(" ORDER BY created_at LIMIT ");
        claim.push_bind(i64::from(batch_limit));
        claim.push(" FOR UPDATE SKIP LOCKED) RETURNING id");

        let mut tx = self.pool.begin().await?;
        let ids: Vec<Uuid> = claim.build_query_scalar().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        debug!(claimed = ids.len(), batch_limit = batch_limit, "Claimed documents");
        Ok(ids)
    }

    async fn unclaim(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE documents SET status = 'pending', updated_at = now()
            WHERE id = ANY($1) AND status = 'processing'
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DocumentFilter) {
    let mut separator = " WHERE ";

    if let Some(ids) = &filter.ids {
        builder.push(separator).push("id = ANY(");
        builder.push_bind(ids.clone()).push(")");
        separator = " AND ";
    }
    if let Some(status) = filter.status {
        builder.push(separator).push("status = ");
        builder.push_bind(status.as_str());
        separator = " AND ";
    }
    if let Some(datasource_id) = filter.datasource_id {
        builder.push(separator).push("datasource_id = ");
        builder.push_bind(datasource_id);
    }
}

async fn replace_content_parts(
    tx: &mut Transaction<'_, Postgres>,
    document: &Document,
) -> Result<()> {
    sqlx::query("DELETE FROM document_content_parts WHERE document_id = $1")
        .bind(document.id)
        .execute(&mut **tx)
        .await?;

    for (position, part) in document.content_parts.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO document_content_parts
                (document_id, position, text, vector, provider_id, token_count, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(document.id)
        .bind(position as i32)
        .bind(&part.text)
        .bind(&part.vector)
        .bind(part.provider_id)
        .bind(part.token_count as i32)
        .bind(part.generated_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn document_from_row(row: &PgRow) -> Result<Document> {
    let status: String = row.try_get("status")?;
    let Json(metadata): Json<HashMap<String, serde_json::Value>> = row.try_get("metadata")?;

    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        metadata,
        content_parts: Vec::new(),
        status: status.parse::<DocumentStatus>().map_err(decode_error)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        fetched_at: row.try_get("fetched_at")?,
        datasource_id: row.try_get("datasource_id")?,
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, document: &Document) -> docpipe_core::Result<()> {
        Ok(self.upsert(document).await?)
    }

    async fn get(
        &self,
        filter: &DocumentFilter,
        options: QueryOptions,
    ) -> docpipe_core::Result<PaginatedDocuments> {
        Ok(self.query(filter, options).await?)
    }

    async fn get_for_processing(
        &self,
        filter: &DocumentFilter,
        batch_limit: u32,
    ) -> docpipe_core::Result<Vec<Uuid>> {
        Ok(self.claim(filter, batch_limit).await?)
    }

    async fn update(&self, document: &Document) -> docpipe_core::Result<()> {
        Ok(self.save(document).await?)
    }

    async fn release(&self, ids: &[Uuid]) -> docpipe_core::Result<u64> {
        Ok(self.unclaim(ids).await?)
    }
}
