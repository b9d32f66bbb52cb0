//! Retrying store adapter
//!
//! Transient failures are retried with bounded exponential backoff
//! (`base * 2^(attempt - 1)`, capped at `max_delay`) until the attempt
//! ceiling. Permanent failures surface after the first attempt. A cancelled
//! shutdown token interrupts backoff waits; the first attempt always runs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DocumentStore, WriteStatus};
use crate::error::StoreError;
use crate::record::CrawlResultRecord;

/// Default ceiling on write attempts per record
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the second attempt
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;

/// Default cap on a single backoff wait
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Retries without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A write that landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSuccess {
    pub status: WriteStatus,
    pub attempts: u32,
}

/// A write that did not land, after the retry policy ran its course
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFailure {
    /// Permanent error, not retried
    Rejected(StoreError),
    /// Transient errors until the attempt ceiling
    Exhausted { attempts: u32, last_error: StoreError },
    /// Shutdown requested before the write could complete
    Shutdown,
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreFailure::Rejected(err) => write!(f, "{err}"),
            StoreFailure::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            StoreFailure::Shutdown => f.write_str("shutdown"),
        }
    }
}

pub type StoreResult = Result<StoreSuccess, StoreFailure>;

/// Retry/backoff wrapper around a shared [`DocumentStore`]
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort pending retries once `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }

    pub async fn upsert(&self, record: &CrawlResultRecord) -> StoreResult {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.store.upsert(record).await {
                Ok(status) => {
                    debug!(
                        identifier = record.identifier(),
                        ?status,
                        attempt,
                        "Document written"
                    );
                    return Ok(StoreSuccess {
                        status,
                        attempts: attempt,
                    });
                },
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(StoreFailure::Rejected(err));
            }
            if attempt >= self.policy.max_attempts {
                return Err(StoreFailure::Exhausted {
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                identifier = record.identifier(),
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Store write failed, retrying"
            );
            if !self.backoff(delay).await {
                return Err(StoreFailure::Shutdown);
            }
        }
    }

    /// Per-record results in input order. Only the records that failed
    /// transiently are resubmitted on later attempts.
    pub async fn upsert_batch(&self, records: &[CrawlResultRecord]) -> Vec<StoreResult> {
        let mut results: Vec<Option<StoreResult>> = records.iter().map(|_| None).collect();
        let mut pending: Vec<usize> = (0..records.len()).collect();
        let mut attempt = 0;

        while !pending.is_empty() {
            attempt += 1;
            let round: Vec<CrawlResultRecord> =
                pending.iter().map(|&i| records[i].clone()).collect();
            let mut outcomes = self.store.upsert_batch(&round).await.into_iter();

            let mut retry = Vec::new();
            for &index in &pending {
                let outcome = outcomes.next().unwrap_or_else(|| {
                    Err(StoreError::permanent("store returned fewer results than records"))
                });
                match outcome {
                    Ok(status) => {
                        results[index] = Some(Ok(StoreSuccess {
                            status,
                            attempts: attempt,
                        }))
                    },
                    Err(err) if !err.is_transient() => {
                        results[index] = Some(Err(StoreFailure::Rejected(err)))
                    },
                    Err(err) if attempt >= self.policy.max_attempts => {
                        results[index] = Some(Err(StoreFailure::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        }))
                    },
                    Err(_) => retry.push(index),
                }
            }

            if retry.is_empty() {
                break;
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                failed = retry.len(),
                batch = records.len(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Batch write partially failed, retrying failed records"
            );
            if !self.backoff(delay).await {
                for index in retry {
                    results[index] = Some(Err(StoreFailure::Shutdown));
                }
                break;
            }
            pending = retry;
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(StoreFailure::Shutdown)))
            .collect()
    }

    /// False when shutdown interrupted the wait
    async fn backoff(&self, delay: Duration) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
