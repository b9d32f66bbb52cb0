//! Error taxonomy of the ingestion pipeline
//!
//! Record-level errors ([`MalformedInputError`], [`ValidationError`],
//! [`StoreError`]) are always recovered inside the processor and turned into
//! a per-record outcome. Only [`StartupError`] is fatal.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::processor::ProcessorState;

/// Input that could not even be split into candidate fields
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed input: {reason}")]
pub struct MalformedInputError {
    pub reason: String,
    /// Offending input text, when the feed kept it
    pub raw: Option<String>,
}

impl MalformedInputError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

/// Fields of a crawl result, named as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordField {
    #[serde(rename = "identifier")]
    Identifier,
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "timestampObserved")]
    TimestampObserved,
    #[serde(rename = "payload")]
    Payload,
}

impl RecordField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::Identifier => "identifier",
            RecordField::Url => "url",
            RecordField::Status => "status",
            RecordField::TimestampObserved => "timestampObserved",
            RecordField::Payload => "payload",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a field failed validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    #[error("missing")]
    Missing,

    #[error("expected {expected}")]
    WrongType { expected: &'static str },

    #[error("empty")]
    Empty,

    #[error("not an absolute URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("no host")]
    MissingHost,

    #[error("unknown status {0:?}")]
    UnknownStatus(String),

    #[error("unparseable timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("{ahead_secs}s in the future (tolerance {tolerance_secs}s)")]
    InFuture { ahead_secs: i64, tolerance_secs: i64 },

    #[error("{size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("unsupported value at {path}")]
    UnsupportedValue { path: String },
}

/// A record that parsed but is semantically invalid
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: RecordField,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub fn new(field: RecordField, reason: ValidationReason) -> Self {
        Self { field, reason }
    }
}

/// Failure reported by a [`DocumentStore`](crate::store::DocumentStore)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Expected to clear up on retry (timeouts, dropped connections)
    #[error("transient store error: {0}")]
    Transient(String),

    /// Retrying cannot help (constraint violations, bad keys)
    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        StoreError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StoreError::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Fatal conditions detected before any record is accepted
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("document store unreachable: {0}")]
    StoreUnreachable(String),

    #[error("failed to prepare document store schema: {0}")]
    Schema(String),
}

/// Lifecycle errors of the ingestion processor
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("cannot {action} a processor that is {state}")]
    InvalidTransition {
        action: &'static str,
        state: ProcessorState,
    },

    #[error(transparent)]
    Startup(#[from] StartupError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field_and_reason() {
        let err = ValidationError::new(RecordField::Identifier, ValidationReason::Empty);
        assert_eq!(err.to_string(), "invalid identifier: empty");
        assert_eq!(err.reason.to_string(), "empty");
    }

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::transient("connection reset").is_transient());
        assert!(!StoreError::permanent("duplicate key").is_transient());
    }

    #[test]
    fn test_field_wire_names() {
        assert_eq!(RecordField::TimestampObserved.as_str(), "timestampObserved");
        assert_eq!(
            serde_json::to_string(&RecordField::Payload).ok().as_deref(),
            Some("\"payload\"")
        );
    }
}
