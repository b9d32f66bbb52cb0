//! Document store seam
//!
//! [`DocumentStore`] is the thin client interface of a backing store: keyed
//! upserts, batch upserts with per-record results, a health check and an
//! append-only rejects collection. It does not retry.
//!
//! [`StoreAdapter`] sits on top of any [`DocumentStore`] and owns the retry
//! and backoff policy, so that policy stays independent of the client's
//! threading behavior.

pub mod adapter;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::CrawlResultRecord;

pub use adapter::{RetryPolicy, StoreAdapter, StoreFailure, StoreResult, StoreSuccess};
pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

/// What a successful keyed write did to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    /// No document existed for the identifier
    Inserted,
    /// An existing document with different content was overwritten
    Updated,
    /// An identical document already existed
    Unchanged,
}

/// A record that never made it into the main collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub id: Uuid,
    pub identifier: Option<String>,
    pub reject_reason: String,
    pub raw: Value,
    pub rejected_at: DateTime<Utc>,
}

impl RejectedRecord {
    pub fn new(identifier: Option<String>, reject_reason: impl Into<String>, raw: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            reject_reason: reject_reason.into(),
            raw,
            rejected_at: Utc::now(),
        }
    }
}

/// Client interface of a document store.
///
/// Implementations must be safe to share between workers without external
/// locking; per-document atomicity comes from the store's upsert.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Write the record's document keyed by its identifier; last call wins
    async fn upsert(&self, record: &CrawlResultRecord) -> Result<WriteStatus, StoreError>;

    /// One result per input record, in input order.
    ///
    /// A failing record must not prevent the others from being written.
    async fn upsert_batch(
        &self,
        records: &[CrawlResultRecord],
    ) -> Vec<Result<WriteStatus, StoreError>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.upsert(record).await);
        }
        results
    }

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Append to the rejects collection
    async fn store_reject(&self, reject: &RejectedRecord) -> Result<(), StoreError>;
}
