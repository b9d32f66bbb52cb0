//! In-memory document store
//!
//! Backs `--dry-run` and the test suites. Failures can be scripted per
//! identifier, the whole store can be taken offline, and an artificial write
//! latency keeps records in flight long enough to observe lifecycle changes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::{DocumentStore, RejectedRecord, WriteStatus};
use crate::error::StoreError;
use crate::record::CrawlResultRecord;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Value>>,
    rejects: RwLock<Vec<RejectedRecord>>,
    failures: Mutex<HashMap<String, VecDeque<StoreError>>>,
    offline: AtomicBool,
    write_attempts: AtomicUsize,
    latency: Duration,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write sleeps for `latency` before touching the collection
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Queue errors returned by the next writes of `identifier`, in order
    pub async fn inject_failures(
        &self,
        identifier: &str,
        errors: impl IntoIterator<Item = StoreError>,
    ) {
        self.failures
            .lock()
            .await
            .entry(identifier.to_string())
            .or_default()
            .extend(errors);
    }

    /// While offline, health checks and writes fail transiently
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn document(&self, identifier: &str) -> Option<Value> {
        self.documents.read().await.get(identifier).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    pub async fn rejects(&self) -> Vec<RejectedRecord> {
        self.rejects.read().await.clone()
    }

    /// Upsert calls seen so far, failed ones included
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::transient("memory store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, record: &CrawlResultRecord) -> Result<WriteStatus, StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_online()?;

        if let Some(err) = self
            .failures
            .lock()
            .await
            .get_mut(record.identifier())
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let document = record
            .to_document()
            .map_err(|e| StoreError::permanent(format!("unserializable record: {e}")))?;

        let mut documents = self.documents.write().await;
        let status = match documents.get(record.identifier()) {
            None => WriteStatus::Inserted,
            Some(existing) if *existing == document => return Ok(WriteStatus::Unchanged),
            Some(_) => WriteStatus::Updated,
        };
        documents.insert(record.identifier().to_string(), document);
        Ok(status)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn store_reject(&self, reject: &RejectedRecord) -> Result<(), StoreError> {
        self.check_online()?;
        self.rejects.write().await.push(reject.clone());
        Ok(())
    }
}
