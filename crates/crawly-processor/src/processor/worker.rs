//! Per-record pipeline and the worker loop that drives it

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::context::ProcessorContext;
use super::outcome::{ProcessingOutcome, RecordOutcome, RejectReason};
use crate::dns::HostResolver;
use crate::feed::FeedItem;
use crate::record::{CrawlResultRecord, RawRecord};
use crate::store::{RejectedRecord, StoreAdapter};
use crate::validate::Validator;

pub(crate) type Intake = Arc<Mutex<mpsc::Receiver<FeedItem>>>;

/// Validate, check the host, store
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) validator: Validator,
    pub(crate) adapter: StoreAdapter,
    pub(crate) resolver: Option<Arc<HostResolver>>,
    pub(crate) persist_rejects: bool,
}

impl Pipeline {
    /// The validated record, or the terminal outcome of a rejected one
    pub(crate) async fn admit(
        &self,
        ctx: &ProcessorContext,
        item: FeedItem,
    ) -> Result<CrawlResultRecord, RecordOutcome> {
        let raw = match item {
            Ok(raw) => raw,
            Err(err) => {
                let raw = err.raw.clone().map_or(Value::Null, Value::String);
                return Err(self.reject(None, RejectReason::Malformed(err), raw).await);
            },
        };

        let record = match self.validator.validate(&raw) {
            Ok(record) => record,
            Err(err) => {
                let identifier = raw.identifier_hint().map(str::to_string);
                return Err(self
                    .reject(identifier, RejectReason::Invalid(err), raw.into_value())
                    .await);
            },
        };

        if let Some(resolver) = &self.resolver {
            let host = record.url().host_str().unwrap_or_default().to_string();
            if !resolver.is_resolvable(&host).await {
                let identifier = Some(record.identifier().to_string());
                return Err(self
                    .reject(identifier, RejectReason::UnresolvableHost(host), raw.into_value())
                    .await);
            }
        }

        ctx.record_accepted();
        debug!(identifier = record.identifier(), "Record accepted");
        Ok(record)
    }

    pub(crate) async fn process(&self, ctx: &ProcessorContext, item: FeedItem) -> RecordOutcome {
        let record = match self.admit(ctx, item).await {
            Ok(record) => record,
            Err(outcome) => return outcome,
        };
        let result = self.adapter.upsert(&record).await;
        RecordOutcome::new(Some(record.identifier().to_string()), result.into())
    }

    async fn reject(&self, identifier: Option<String>, reason: RejectReason, raw: Value) -> RecordOutcome {
        if self.persist_rejects {
            let reject = RejectedRecord::new(identifier.clone(), reason.to_string(), raw);
            if let Err(e) = self.adapter.store().store_reject(&reject).await {
                warn!(identifier = ?identifier, error = %e, "Failed to persist rejected record");
            }
        }
        RecordOutcome::new(identifier, ProcessingOutcome::Rejected(reason))
    }
}

/// Identifier to report when a record is cut short before validation
pub(crate) fn identifier_of(item: &FeedItem) -> Option<String> {
    item.as_ref()
        .ok()
        .and_then(RawRecord::identifier_hint)
        .map(str::to_string)
}

/// Take records off the intake queue until it closes or the processor aborts
pub(crate) async fn run(
    worker_id: usize,
    ctx: Arc<ProcessorContext>,
    pipeline: Arc<Pipeline>,
    intake: Intake,
) {
    debug!(worker_id, "Worker started");
    loop {
        let item = {
            let mut rx = intake.lock().await;
            tokio::select! {
                biased;
                _ = ctx.abort_token().cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(item) = item else { break };

        let identifier = identifier_of(&item);
        let outcome = tokio::select! {
            biased;
            _ = ctx.abort_token().cancelled() => RecordOutcome::shutdown(identifier),
            outcome = pipeline.process(&ctx, item) => outcome,
        };
        ctx.report(&outcome);
    }
    debug!(worker_id, "Worker finished");
}
