//! Versioned schema migrations
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_migrations`, so re-running is a no-op.

use sqlx::{PgPool, Row};
use tracing::info;

use crate::{InfraError, Result};

/// One reversible schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_datasources",
        up: &[r#"
            CREATE TABLE IF NOT EXISTS datasources (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                settings JSONB NOT NULL DEFAULT '{}'::jsonb,
                state JSONB NOT NULL DEFAULT 'null'::jsonb,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
        "#],
        down: &["DROP TABLE IF EXISTS datasources"],
    },
    Migration {
        version: 2,
        name: "create_documents",
        up: &[
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                status TEXT NOT NULL DEFAULT 'pending',
                datasource_id UUID REFERENCES datasources(id) ON DELETE SET NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                fetched_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_documents_status_created ON documents(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_documents_datasource ON documents(datasource_id)",
        ],
        down: &["DROP TABLE IF EXISTS documents"],
    },
    Migration {
        version: 3,
        name: "create_document_content_parts",
        up: &[
            r#"
            CREATE TABLE IF NOT EXISTS document_content_parts (
                document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                vector REAL[] NOT NULL,
                provider_id UUID NOT NULL,
                token_count INTEGER NOT NULL DEFAULT 0,
                generated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (document_id, position)
            )
            "#,
        ],
        down: &["DROP TABLE IF EXISTS document_content_parts"],
    },
    Migration {
        version: 4,
        name: "create_embedding_providers",
        up: &[
            r#"
            CREATE TABLE IF NOT EXISTS embedding_providers (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                model TEXT NOT NULL,
                base_url TEXT,
                api_key TEXT,
                dimensions INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            // at most one active provider
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_embedding_providers_active ON embedding_providers(is_active) WHERE is_active",
        ],
        down: &["DROP TABLE IF EXISTS embedding_providers"],
    },
];

async fn ensure_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn applied_versions(pool: &PgPool) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| row.try_get::<i64, _>("version").map_err(InfraError::from))
        .collect()
}

/// Apply all pending migrations, returning how many ran
pub async fn run_migrations(pool: &PgPool) -> Result<usize> {
    ensure_migrations_table(pool).await?;
    let applied = applied_versions(pool).await?;

    let mut count = 0;
    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        let mut tx = pool.begin().await?;
        for statement in migration.up {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    InfraError::Migration(format!("{} (v{}): {}", migration.name, migration.version, e))
                })?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = migration.version, name = migration.name, "Applied migration");
        count += 1;
    }

    Ok(count)
}

/// Revert applied migrations newer than `target_version`, newest first
pub async fn rollback_migrations(pool: &PgPool, target_version: i64) -> Result<usize> {
    ensure_migrations_table(pool).await?;
    let applied = applied_versions(pool).await?;

    let mut count = 0;
    for migration in MIGRATIONS
        .iter()
        .rev()
        .filter(|m| m.version > target_version && applied.contains(&m.version))
    {
        let mut tx = pool.begin().await?;
        for statement in migration.down {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    InfraError::Migration(format!("{} (v{}): {}", migration.name, migration.version, e))
                })?;
        }
        sqlx::query("DELETE FROM schema_migrations WHERE version = $1")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = migration.version, name = migration.name, "Rolled back migration");
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_versions_are_increasing() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_every_migration_is_reversible() {
        for migration in MIGRATIONS {
            assert!(!migration.up.is_empty(), "{} has no up", migration.name);
            assert!(!migration.down.is_empty(), "{} has no down", migration.name);
        }
    }
}
