//! PostgreSQL-backed document collection
//!
//! Documents live as JSONB in `crawl_results`, keyed by identifier. The
//! upsert only rewrites a row when the document actually differs, so
//! resubmitting identical content leaves the row untouched.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use super::{DocumentStore, RejectedRecord, WriteStatus};
use crate::config::StoreConfig;
use crate::error::{StartupError, StoreError};
use crate::record::CrawlResultRecord;

const UPSERT_SQL: &str = r#"
    INSERT INTO crawl_results (identifier, document, written_at)
    VALUES ($1, $2, NOW())
    ON CONFLICT (identifier) DO UPDATE
        SET document = EXCLUDED.document,
            written_at = EXCLUDED.written_at
        WHERE crawl_results.document IS DISTINCT FROM EXCLUDED.document
    RETURNING (xmax = 0) AS inserted
"#;

const INSERT_REJECT_SQL: &str = r#"
    INSERT INTO crawl_rejects (id, identifier, reject_reason, raw, rejected_at)
    VALUES ($1, $2, $3, $4, $5)
"#;

/// SQLSTATE codes worth another attempt
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") // connection exception
        || matches!(
            code,
            "40001" // serialization_failure
                | "40P01" // deadlock_detected
                | "53300" // too_many_connections
                | "55P03" // lock_not_available
                | "57014" // query_canceled (statement timeout)
                | "57P01" // admin_shutdown
                | "57P02" // crash_shutdown
                | "57P03" // cannot_connect_now
        )
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => db.code().is_some_and(|c| is_transient_sqlstate(&c)),
            _ => false,
        };
        if transient {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Permanent(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the pool and prove the server answers
    pub async fn connect(config: &StoreConfig) -> Result<Self, StartupError> {
        let options = config
            .connect_options()
            .map_err(|e| StartupError::StoreUnreachable(e.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| StartupError::StoreUnreachable(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Document store connection pool established"
        );
        Ok(Self { pool })
    }

    /// Apply the workspace migrations
    pub async fn migrate(&self) -> Result<(), StartupError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StartupError::Schema(e.to_string()))?;
        info!("Document store schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn document(&self, identifier: &str) -> Result<Option<Value>, StoreError> {
        let document =
            sqlx::query_scalar::<_, Value>("SELECT document FROM crawl_results WHERE identifier = $1")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
        Ok(document)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM crawl_results")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn upsert(&self, record: &CrawlResultRecord) -> Result<WriteStatus, StoreError> {
        let document = record
            .to_document()
            .map_err(|e| StoreError::permanent(format!("unserializable record: {e}")))?;

        let inserted = sqlx::query_scalar::<_, bool>(UPSERT_SQL)
            .bind(record.identifier())
            .bind(document)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match inserted {
            Some(true) => WriteStatus::Inserted,
            Some(false) => WriteStatus::Updated,
            // the conflict clause filtered the row out: identical document
            None => WriteStatus::Unchanged,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_reject(&self, reject: &RejectedRecord) -> Result<(), StoreError> {
        sqlx::query(INSERT_REJECT_SQL)
            .bind(reject.id)
            .bind(reject.identifier.as_deref())
            .bind(&reject.reject_reason)
            .bind(&reject.raw)
            .bind(reject.rejected_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
