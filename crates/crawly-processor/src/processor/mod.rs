//! Ingestion processor
//!
//! Pulls raw records from a [`RecordFeed`], validates them and hands the valid
//! ones to the [`StoreAdapter`]. A pump task feeds a bounded intake queue
//! consumed by a fixed pool of workers; a full queue stalls the pump.
//!
//! Lifecycle: `IDLE -> RUNNING -> DRAINING -> STOPPED`.
//!
//! - [`IngestionProcessor::drain`] stops pulling from the feed and lets every
//!   record already taken from it finish. Pending retries are cut short.
//! - [`IngestionProcessor::stop`] also preempts in-flight writes; records cut
//!   short this way, and records still queued, end as
//!   `STORE_FAILED(shutdown)`.
//! - Feed exhaustion moves the processor to `DRAINING` on its own.
//!
//! [`IngestionProcessor::start_import`] runs the same lifecycle over the
//! batch path: records are pulled in batches and written with batch upserts.
//!
//! Every received record reaches exactly one terminal outcome.

mod context;
mod outcome;
mod worker;

pub use context::{ProcessingSummary, ProcessorState};
pub use outcome::{OutcomeKind, ProcessingOutcome, RecordOutcome, RejectReason};

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::dns::{HostLookup, HostResolver};
use crate::error::{ProcessorError, StartupError};
use crate::feed::{FeedItem, RecordFeed};
use crate::store::{DocumentStore, StoreAdapter};
use crate::validate::Validator;
use context::ProcessorContext;
use worker::{identifier_of, Pipeline};

pub struct IngestionProcessor {
    ctx: Arc<ProcessorContext>,
    pipeline: Arc<Pipeline>,
    config: PipelineConfig,
}

impl IngestionProcessor {
    pub fn new(store: Arc<dyn DocumentStore>, config: PipelineConfig) -> Self {
        let ctx = Arc::new(ProcessorContext::new());
        let adapter =
            StoreAdapter::new(store, config.retry).with_shutdown(ctx.shutdown_token().clone());
        let resolver = config
            .check_hosts
            .then(|| Arc::new(HostResolver::system()));

        let pipeline = Pipeline {
            validator: Validator::new(config.limits),
            adapter,
            resolver,
            persist_rejects: config.persist_rejects,
        };

        Self {
            ctx,
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    /// Check hosts against `lookup` instead of the system resolver
    pub fn with_host_lookup(mut self, lookup: Arc<dyn HostLookup>) -> Self {
        let mut pipeline = (*self.pipeline).clone();
        pipeline.resolver = Some(Arc::new(HostResolver::new(lookup)));
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Receive every terminal outcome from now on. Only the first call
    /// gets a receiver.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<RecordOutcome>> {
        self.ctx.subscribe()
    }

    pub fn state(&self) -> ProcessorState {
        self.ctx.state()
    }

    pub fn summary(&self) -> ProcessingSummary {
        self.ctx.summary()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fails with [`StartupError::StoreUnreachable`] when the store does not
    /// answer its health check
    pub async fn verify_store(&self) -> Result<(), StartupError> {
        let adapter = &self.pipeline.adapter;
        adapter.health_check().await.map_err(|e| {
            error!(store = adapter.store().name(), error = %e, "Document store health check failed");
            StartupError::StoreUnreachable(e.to_string())
        })?;
        info!(store = adapter.store().name(), "Document store is reachable");
        Ok(())
    }

    /// Verify the store, then consume `feed` in the background
    pub async fn start<F>(&self, feed: F) -> Result<(), ProcessorError>
    where
        F: RecordFeed + 'static,
    {
        self.begin("start").await?;
        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Starting ingestion processor"
        );
        tokio::spawn(supervise(
            self.ctx.clone(),
            self.pipeline.clone(),
            self.config.clone(),
            feed,
        ));
        Ok(())
    }

    /// Like [`start`](Self::start), but pulls `feed` in batches of the
    /// configured batch size and writes them through the batch path
    pub async fn start_import<F>(&self, feed: F) -> Result<(), ProcessorError>
    where
        F: RecordFeed + 'static,
    {
        self.begin("import").await?;
        info!(batch_size = self.config.batch_size, "Starting batch import");
        tokio::spawn(import(
            self.ctx.clone(),
            self.pipeline.clone(),
            self.config.clone(),
            feed,
        ));
        Ok(())
    }

    async fn begin(&self, action: &'static str) -> Result<(), ProcessorError> {
        let state = self.state();
        if state != ProcessorState::Idle {
            return Err(ProcessorError::InvalidTransition { action, state });
        }
        self.verify_store().await?;
        self.ctx
            .transition(action, &[ProcessorState::Idle], ProcessorState::Running)?;
        Ok(())
    }

    /// Stop intake, finish what was taken from the feed, then stop
    pub async fn drain(&self) -> Result<ProcessingSummary, ProcessorError> {
        use ProcessorState::*;

        match self.ctx.transition("drain", &[Running, Draining], Draining) {
            Ok(_) => {},
            // the feed ran out and the processor already finished
            Err(_) if self.state() == Stopped => return Ok(self.summary()),
            Err(e) => return Err(e),
        }

        info!("Draining ingestion processor");
        self.ctx.shutdown_token().cancel();
        self.ctx.wait_for_state(Stopped).await;
        Ok(self.summary())
    }

    /// Terminate now; unfinished records end as `STORE_FAILED(shutdown)`
    pub async fn stop(&self) -> ProcessingSummary {
        use ProcessorState::*;

        if self.ctx.transition("stop", &[Idle], Stopped).is_ok() {
            return self.summary();
        }
        if self.state() != Stopped {
            warn!("Stopping ingestion processor, cutting in-flight records short");
            self.ctx.shutdown_token().cancel();
            self.ctx.abort_token().cancel();
            self.ctx.wait_for_state(Stopped).await;
        }
        self.summary()
    }

    pub async fn wait_stopped(&self) -> ProcessingSummary {
        self.ctx.wait_for_state(ProcessorState::Stopped).await;
        self.summary()
    }

    /// Batch path: one outcome per input, in input order.
    ///
    /// Valid records are written through the adapter's batch upsert in
    /// chunks of the configured batch size. Each outcome is reported as soon
    /// as its record settles.
    pub async fn process_batch(&self, items: Vec<FeedItem>) -> Vec<RecordOutcome> {
        settle_batch(&self.ctx, &self.pipeline, self.config.batch_size, items).await
    }
}

async fn settle_batch(
    ctx: &ProcessorContext,
    pipeline: &Pipeline,
    batch_size: usize,
    items: Vec<FeedItem>,
) -> Vec<RecordOutcome> {
    let mut outcomes: Vec<Option<RecordOutcome>> = items.iter().map(|_| None).collect();
    let mut accepted = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        ctx.record_received();
        match pipeline.admit(ctx, item).await {
            Ok(record) => accepted.push((index, record)),
            Err(outcome) => {
                ctx.report(&outcome);
                outcomes[index] = Some(outcome);
            },
        }
    }

    for chunk in accepted.chunks(batch_size.max(1)) {
        let records: Vec<_> = chunk.iter().map(|(_, record)| record.clone()).collect();
        // stop() settles the chunk in flight and every chunk after it
        let results = tokio::select! {
            biased;
            _ = ctx.abort_token().cancelled() => None,
            results = pipeline.adapter.upsert_batch(&records) => Some(results),
        };

        let settled: Vec<RecordOutcome> = match results {
            Some(results) => chunk
                .iter()
                .zip(results)
                .map(|((_, record), result)| {
                    RecordOutcome::new(Some(record.identifier().to_string()), result.into())
                })
                .collect(),
            None => chunk
                .iter()
                .map(|(_, record)| RecordOutcome::shutdown(Some(record.identifier().to_string())))
                .collect(),
        };
        for ((index, _), outcome) in chunk.iter().zip(settled) {
            ctx.report(&outcome);
            outcomes[*index] = Some(outcome);
        }
    }

    outcomes
        .into_iter()
        .map(|outcome| {
            outcome.unwrap_or_else(|| {
                let outcome = RecordOutcome::shutdown(None);
                ctx.report(&outcome);
                outcome
            })
        })
        .collect()
}

/// Pull batches until the feed ends or shutdown is requested. Records
/// already pulled when shutdown arrives are still settled.
async fn import<F: RecordFeed>(
    ctx: Arc<ProcessorContext>,
    pipeline: Arc<Pipeline>,
    config: PipelineConfig,
    mut feed: F,
) {
    let batch_size = config.batch_size.max(1);
    let mut exhausted = false;

    while !exhausted && !ctx.shutdown_token().is_cancelled() {
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            let item = tokio::select! {
                biased;
                _ = ctx.shutdown_token().cancelled() => break,
                item = feed.next_record() => item,
            };
            match item {
                Some(item) => batch.push(item),
                None => {
                    exhausted = true;
                    break;
                },
            }
        }
        if batch.is_empty() {
            continue;
        }

        let outcomes = settle_batch(&ctx, &pipeline, batch_size, batch).await;
        let summary = ctx.summary();
        debug!(
            batch = outcomes.len(),
            received = summary.received,
            stored = summary.stored,
            "Batch processed"
        );
    }

    if exhausted {
        info!("Feed exhausted, draining");
        let _ = ctx.transition(
            "drain",
            &[ProcessorState::Running, ProcessorState::Draining],
            ProcessorState::Draining,
        );
    }
    finish(&ctx);
}

/// Runs the pump inline, then waits for the workers and settles leftovers
async fn supervise<F: RecordFeed>(
    ctx: Arc<ProcessorContext>,
    pipeline: Arc<Pipeline>,
    config: PipelineConfig,
    feed: F,
) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let intake = Arc::new(Mutex::new(rx));

    let mut workers = JoinSet::new();
    for worker_id in 0..config.workers.max(1) {
        workers.spawn(worker::run(
            worker_id,
            ctx.clone(),
            pipeline.clone(),
            intake.clone(),
        ));
    }

    pump(&ctx, feed, tx).await;

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task failed");
        }
    }

    // only non-empty after an abort
    let mut rx = intake.lock().await;
    rx.close();
    while let Ok(item) = rx.try_recv() {
        ctx.report(&RecordOutcome::shutdown(identifier_of(&item)));
    }
    drop(rx);

    finish(&ctx);
}

fn finish(ctx: &ProcessorContext) {
    let _ = ctx.transition(
        "finish",
        &[ProcessorState::Running, ProcessorState::Draining],
        ProcessorState::Stopped,
    );
    let summary = ctx.summary();
    info!(
        received = summary.received,
        accepted = summary.accepted,
        rejected = summary.rejected,
        stored = summary.stored,
        store_failed = summary.store_failed,
        "Ingestion processor stopped"
    );
}

/// Move records from the feed to the intake queue until the feed ends or
/// shutdown is requested
async fn pump<F: RecordFeed>(ctx: &ProcessorContext, mut feed: F, tx: mpsc::Sender<FeedItem>) {
    loop {
        let item = tokio::select! {
            biased;
            _ = ctx.shutdown_token().cancelled() => break,
            item = feed.next_record() => item,
        };
        let Some(item) = item else {
            info!("Feed exhausted, draining");
            let _ = ctx.transition(
                "drain",
                &[ProcessorState::Running, ProcessorState::Draining],
                ProcessorState::Draining,
            );
            break;
        };
        ctx.record_received();

        let identifier = identifier_of(&item);
        let sent = tokio::select! {
            biased;
            _ = ctx.abort_token().cancelled() => false,
            sent = tx.send(item) => sent.is_ok(),
        };
        if !sent {
            ctx.report(&RecordOutcome::shutdown(identifier));
            break;
        }
    }
}
