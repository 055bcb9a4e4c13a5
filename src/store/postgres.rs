//! Postgres-backed collections.
//!
//! Each collection is a table `(id uuid, seq bigserial, doc jsonb)`. Indexes
//! are expression indexes on `doc ->> 'field'`, filters use `doc @> $1`.
//! Collection, index and field names are validated identifiers before they
//! are spliced into SQL.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    types::Json,
    FromRow, PgPool,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Document, DocumentBackend, IndexSpec, ReplaceOutcome, StoreError};
use crate::config::StoreConfig;

#[derive(Debug, FromRow)]
struct DocumentRow {
    doc: Json<Document>,
}

#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.db_name);
        if let Some(creds) = &config.credentials {
            // the server picks md5 or SCRAM itself; the configured value is informational
            debug!(mechanism = ?creds.auth_mechanism, "store credentials configured");
            options = options.username(&creds.username).password(&creds.password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .with_context(|| format!("connect to store at {}:{}", config.host, config.port))?;
        Ok(Self::new(pool))
    }
}

/// Unique violations become [`StoreError::Duplicate`], naming the index
/// Postgres reports or `fallback` when it reports none.
fn map_write_error(err: sqlx::Error, fallback: &str) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            let index = db.constraint().unwrap_or(fallback).to_string();
            return StoreError::Duplicate { index };
        }
    }
    StoreError::Database(err)
}

/// `LIMIT` bound as a Postgres BIGINT; counts beyond `i64::MAX` mean no limit.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl DocumentBackend for PgBackend {
    async fn create_collection(&self, collection: &str) -> Result<(), StoreError> {
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{collection}" (
                id UUID PRIMARY KEY,
                seq BIGSERIAL NOT NULL,
                doc JSONB NOT NULL
            )"#
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT tablename::text
            FROM pg_tables
            WHERE schemaname = current_schema()
            ORDER BY tablename
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn index_names(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT indexname::text
            FROM pg_indexes
            WHERE schemaname = current_schema() AND tablename = $1
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        spec: &IndexSpec,
    ) -> Result<(), StoreError> {
        let unique = if spec.unique { "UNIQUE " } else { "" };
        let sql = format!(
            r#"CREATE {unique}INDEX IF NOT EXISTS "{name}" ON "{collection}" ((doc ->> '{field}'))"#,
            field = spec.field
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, name))?;
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        let id = Uuid::new_v4();
        let sql = format!(r#"INSERT INTO "{collection}" (id, doc) VALUES ($1, $2)"#);
        sqlx::query(&sql)
            .bind(id)
            .bind(Json(doc))
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, collection))?;
        Ok(id.to_string())
    }

    async fn replace_single(
        &self,
        collection: &str,
        filter: &Document,
        doc: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let update = format!(r#"UPDATE "{collection}" SET doc = $1 WHERE doc @> $2"#);
        let matched = sqlx::query(&update)
            .bind(Json(&doc))
            .bind(Json(filter))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, collection))?
            .rows_affected();

        if matched > 1 {
            warn!(collection, matched, "replace matched several rows; rolling back");
            tx.rollback().await?;
            return Ok(ReplaceOutcome {
                matched,
                ..ReplaceOutcome::default()
            });
        }

        if matched == 0 && upsert {
            let id = Uuid::new_v4();
            let insert = format!(r#"INSERT INTO "{collection}" (id, doc) VALUES ($1, $2)"#);
            sqlx::query(&insert)
                .bind(id)
                .bind(Json(&doc))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_write_error(e, collection))?;
            tx.commit().await?;
            debug!(collection, %id, "upsert inserted");
            return Ok(ReplaceOutcome {
                upserted_id: Some(id.to_string()),
                ..ReplaceOutcome::default()
            });
        }

        tx.commit().await?;
        Ok(ReplaceOutcome {
            matched,
            modified: matched,
            upserted_id: None,
        })
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let sql = format!(r#"SELECT doc FROM "{collection}" WHERE doc @> $1 ORDER BY seq LIMIT $2"#);
        let rows = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(Json(filter))
            .bind(limit.map(sql_limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.doc.0).collect())
    }

    async fn delete_single(&self, collection: &str, filter: &Document) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(r#"DELETE FROM "{collection}" WHERE doc @> $1"#);
        let deleted = sqlx::query(&sql)
            .bind(Json(filter))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted > 1 {
            warn!(collection, deleted, "delete matched several rows; rolling back");
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        Ok(deleted)
    }
}
