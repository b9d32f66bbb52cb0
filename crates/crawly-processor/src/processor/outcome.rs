use serde::Serialize;
use std::fmt;

use crate::error::{MalformedInputError, ValidationError};
use crate::store::{StoreFailure, StoreResult, WriteStatus};

/// Why a record never reached the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Malformed(MalformedInputError),
    Invalid(ValidationError),
    UnresolvableHost(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Malformed(err) => write!(f, "{err}"),
            RejectReason::Invalid(err) => write!(f, "{err}"),
            RejectReason::UnresolvableHost(host) => write!(f, "unresolvable host {host:?}"),
        }
    }
}

/// Per-record processing outcome.
///
/// `Accepted` is intermediate; the other variants are terminal and every
/// received record reaches exactly one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Accepted,
    Rejected(RejectReason),
    StoreFailed(StoreFailure),
    Stored(WriteStatus),
}

impl ProcessingOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingOutcome::Accepted)
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            ProcessingOutcome::Accepted => OutcomeKind::Accepted,
            ProcessingOutcome::Rejected(_) => OutcomeKind::Rejected,
            ProcessingOutcome::StoreFailed(_) => OutcomeKind::StoreFailed,
            ProcessingOutcome::Stored(_) => OutcomeKind::Stored,
        }
    }
}

impl From<StoreResult> for ProcessingOutcome {
    fn from(result: StoreResult) -> Self {
        match result {
            Ok(success) => ProcessingOutcome::Stored(success.status),
            Err(failure) => ProcessingOutcome::StoreFailed(failure),
        }
    }
}

/// Outcome variant without its payload, for grouping and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Accepted,
    Rejected,
    StoreFailed,
    Stored,
}

/// Outcome of one input record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Normalized identifier, or the raw one when validation did not get that far
    pub identifier: Option<String>,
    pub outcome: ProcessingOutcome,
}

impl RecordOutcome {
    pub fn new(identifier: Option<String>, outcome: ProcessingOutcome) -> Self {
        Self {
            identifier,
            outcome,
        }
    }

    /// Cut short by `stop()`
    pub fn shutdown(identifier: Option<String>) -> Self {
        Self::new(identifier, ProcessingOutcome::StoreFailed(StoreFailure::Shutdown))
    }

    pub fn kind(&self) -> OutcomeKind {
        self.outcome.kind()
    }
}
