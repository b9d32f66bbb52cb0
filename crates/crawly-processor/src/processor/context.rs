//! Shared processor state
//!
//! One [`ProcessorContext`] per processor, handed to the pump and every
//! worker. It owns the lifecycle state machine, the outcome counters, the
//! cancellation tokens and the optional outcome subscriber.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::outcome::{ProcessingOutcome, RecordOutcome};
use crate::error::ProcessorError;

/// Lifecycle of an ingestion processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorState::Idle => "idle",
            ProcessorState::Running => "running",
            ProcessorState::Draining => "draining",
            ProcessorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Aggregate counts over every record the processor has received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingSummary {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub stored: u64,
    pub store_failed: u64,
}

impl ProcessingSummary {
    /// Records that reached a terminal outcome
    pub fn terminal(&self) -> u64 {
        self.rejected + self.stored + self.store_failed
    }
}

#[derive(Debug, Default)]
struct ProcessingStats {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stored: AtomicU64,
    store_failed: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct ProcessorContext {
    state: watch::Sender<ProcessorState>,
    stats: ProcessingStats,
    /// Stops intake and pending retries
    shutdown: CancellationToken,
    /// Preempts in-flight work
    abort: CancellationToken,
    outcomes: OnceLock<mpsc::UnboundedSender<RecordOutcome>>,
}

impl ProcessorContext {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ProcessorState::Idle);
        Self {
            state,
            stats: ProcessingStats::default(),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            outcomes: OnceLock::new(),
        }
    }

    pub(crate) fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Move to `to` if the current state is one of `allowed`; returns the
    /// previous state
    pub(crate) fn transition(
        &self,
        action: &'static str,
        allowed: &[ProcessorState],
        to: ProcessorState,
    ) -> Result<ProcessorState, ProcessorError> {
        let mut result = Err(ProcessorError::InvalidTransition {
            action,
            state: ProcessorState::Idle,
        });
        self.state.send_if_modified(|state| {
            if !allowed.contains(state) {
                result = Err(ProcessorError::InvalidTransition {
                    action,
                    state: *state,
                });
                return false;
            }
            let previous = *state;
            *state = to;
            result = Ok(previous);
            previous != to
        });

        if let Ok(previous) = &result {
            if *previous != to {
                info!(from = %previous, to = %to, "Processor state changed");
            }
        }
        result
    }

    pub(crate) async fn wait_for_state(&self, target: ProcessorState) {
        let mut rx = self.state.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|state| *state == target).await;
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    pub(crate) fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<RecordOutcome>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes.set(tx).ok().map(|_| rx)
    }

    pub(crate) fn record_received(&self) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self) {
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count, log and publish a terminal outcome
    pub(crate) fn report(&self, outcome: &RecordOutcome) {
        let identifier = outcome.identifier.as_deref().unwrap_or("<unknown>");
        match &outcome.outcome {
            ProcessingOutcome::Accepted => return,
            ProcessingOutcome::Stored(status) => {
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
                debug!(identifier, ?status, "Record stored");
            },
            ProcessingOutcome::Rejected(reason) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(identifier, reason = %reason, "Record rejected");
            },
            ProcessingOutcome::StoreFailed(failure) => {
                self.stats.store_failed.fetch_add(1, Ordering::Relaxed);
                warn!(identifier, reason = %failure, "Record could not be stored");
            },
        }

        if let Some(tx) = self.outcomes.get() {
            // a dropped subscriber only loses the feed of outcomes
            let _ = tx.send(outcome.clone());
        }
    }

    pub(crate) fn summary(&self) -> ProcessingSummary {
        ProcessingSummary {
            received: self.stats.received.load(Ordering::Relaxed),
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            stored: self.stats.stored.load(Ordering::Relaxed),
            store_failed: self.stats.store_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{StoreFailure, WriteStatus};
    use ProcessorState::*;

    #[test]
    fn test_transitions() {
        let ctx = ProcessorContext::new();
        assert_eq!(ctx.state(), Idle);

        assert_eq!(ctx.transition("start", &[Idle], Running).unwrap(), Idle);
        let err = ctx.transition("start", &[Idle], Running).unwrap_err();
        assert_eq!(err.to_string(), "cannot start a processor that is running");

        ctx.transition("drain", &[Running, Draining], Draining).unwrap();
        assert_eq!(ctx.transition("drain", &[Running, Draining], Draining).unwrap(), Draining);
        assert_eq!(ctx.state(), Draining);
    }

    #[test]
    fn test_report_counts_terminal_outcomes() {
        let ctx = ProcessorContext::new();
        let mut rx = ctx.subscribe().unwrap();
        assert!(ctx.subscribe().is_none());

        ctx.record_received();
        ctx.record_accepted();
        ctx.report(&RecordOutcome::new(
            Some("a".into()),
            ProcessingOutcome::Stored(WriteStatus::Inserted),
        ));
        ctx.record_received();
        ctx.report(&RecordOutcome::shutdown(Some("b".into())));

        let summary = ctx.summary();
        assert_eq!(summary.received, 2);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.stored, 1);
        assert_eq!(summary.store_failed, 1);
        assert_eq!(summary.terminal(), 2);

        assert_eq!(rx.try_recv().unwrap().identifier.as_deref(), Some("a"));
        assert_eq!(
            rx.try_recv().unwrap().outcome,
            ProcessingOutcome::StoreFailed(StoreFailure::Shutdown)
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(Draining.to_string(), "draining");
        assert_eq!(serde_json::to_string(&Stopped).unwrap(), "\"stopped\"");
    }
}
