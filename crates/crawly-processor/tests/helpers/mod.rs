//! Shared fixtures for the processor integration tests

#![allow(dead_code)]

use crawly_processor::config::PipelineConfig;
use crawly_processor::feed::FeedItem;
use crawly_processor::processor::RecordOutcome;
use crawly_processor::record::RawRecord;
use crawly_processor::store::RetryPolicy;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,crawly_processor=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A valid crawl result as the external crawler would send it
pub fn crawl_result(identifier: &str) -> Value {
    json!({
        "identifier": identifier,
        "url": format!("http://example.com/{identifier}"),
        "status": "SUCCESS",
        "timestampObserved": "2026-01-15T08:30:00Z",
        "payload": {"contentType": "text/html", "size": 5120},
    })
}

pub fn raw(value: Value) -> RawRecord {
    RawRecord::from_value(value).expect("fixture must be a JSON object")
}

pub fn item(value: Value) -> FeedItem {
    Ok(raw(value))
}

/// Small, fast pipeline: no backoff waits
pub fn test_config(workers: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        queue_capacity: 16,
        batch_size: 4,
        retry: RetryPolicy::immediate(3),
        ..PipelineConfig::default()
    }
}

/// Everything currently buffered on the outcome channel
pub fn drain_outcomes(rx: &mut mpsc::UnboundedReceiver<RecordOutcome>) -> Vec<RecordOutcome> {
    let mut outcomes = Vec::new();
    while let Ok(outcome) = rx.try_recv() {
        outcomes.push(outcome);
    }
    outcomes
}
