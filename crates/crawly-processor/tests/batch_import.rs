//! Batch path tests: JSON-lines files through `process_batch`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use crawly_processor::error::StoreError;
use crawly_processor::feed::{self, JsonLinesFeed, RecordFeed};
use crawly_processor::processor::{
    IngestionProcessor, OutcomeKind, ProcessingOutcome, ProcessorState, RejectReason,
};
use crawly_processor::store::{MemoryDocumentStore, StoreFailure, WriteStatus};
use helpers::*;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

async fn wait_until_received(processor: &IngestionProcessor, count: u64) {
    while processor.summary().received < count {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_batch_with_poison_record() {
    init_tracing();
    let store = Arc::new(MemoryDocumentStore::new());
    store
        .inject_failures("poison", [StoreError::permanent("malformed key")])
        .await;
    let processor = IngestionProcessor::new(store.clone(), test_config(1));

    let items = vec![
        item(crawl_result("a")),
        item(crawl_result("poison")),
        item(crawl_result("b")),
        item(json!({"identifier": "c", "url": "ftp://example.com/c"})),
        item(crawl_result("d")),
        item(crawl_result("e")),
    ];
    let outcomes = processor.process_batch(items).await;

    let kinds: Vec<_> = outcomes.iter().map(|o| o.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            OutcomeKind::Stored,
            OutcomeKind::StoreFailed,
            OutcomeKind::Stored,
            OutcomeKind::Rejected,
            OutcomeKind::Stored,
            OutcomeKind::Stored,
        ]
    );
    assert!(matches!(
        outcomes[1].outcome,
        ProcessingOutcome::StoreFailed(StoreFailure::Rejected(_))
    ));
    assert_eq!(outcomes[3].identifier.as_deref(), Some("c"));
    assert_eq!(store.len().await, 4);

    let summary = processor.summary();
    assert_eq!(summary.received, 6);
    assert_eq!(summary.accepted, 5);
    assert_eq!(summary.terminal(), 6);
}

#[tokio::test]
async fn test_resubmitted_batch_is_idempotent() {
    let store = Arc::new(MemoryDocumentStore::new());
    let processor = IngestionProcessor::new(store.clone(), test_config(1));

    let batch = || vec![item(crawl_result("x")), item(crawl_result("y"))];
    processor.process_batch(batch()).await;
    let before = store.document("x").await.unwrap();
    let outcomes = processor.process_batch(batch()).await;

    assert!(outcomes
        .iter()
        .all(|o| o.outcome == ProcessingOutcome::Stored(WriteStatus::Unchanged)));
    assert_eq!(store.len().await, 2);
    assert_eq!(store.document("x").await.unwrap(), before);
}

#[tokio::test]
async fn test_import_json_lines_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for n in 0..10 {
        writeln!(file, "{}", crawl_result(&format!("job-{n}"))).unwrap();
    }
    writeln!(file).unwrap();
    writeln!(file, "{{ not json").unwrap();
    writeln!(file, "{}", json!({"identifier": "  ", "url": "http://example.com"})).unwrap();
    file.flush().unwrap();

    let store = Arc::new(MemoryDocumentStore::new());
    let processor = IngestionProcessor::new(store.clone(), test_config(1));
    processor.verify_store().await.unwrap();

    let mut feed = JsonLinesFeed::open(file.path()).await.unwrap();
    let mut outcomes = Vec::new();
    loop {
        let batch = feed.next_batch(4).await;
        if batch.is_empty() {
            break;
        }
        outcomes.extend(processor.process_batch(batch).await);
    }

    assert_eq!(outcomes.len(), 12);
    assert_eq!(store.len().await, 10);
    assert!(matches!(
        outcomes[10].outcome,
        ProcessingOutcome::Rejected(RejectReason::Malformed(_))
    ));
    assert!(matches!(
        outcomes[11].outcome,
        ProcessingOutcome::Rejected(RejectReason::Invalid(_))
    ));

    let summary = processor.summary();
    assert_eq!(summary.stored, 10);
    assert_eq!(summary.rejected, 2);
}

#[tokio::test]
async fn test_rejects_are_persisted_when_enabled() {
    let store = Arc::new(MemoryDocumentStore::new());
    let mut config = test_config(1);
    config.persist_rejects = true;
    let processor = IngestionProcessor::new(store.clone(), config);

    let mut bad = crawl_result("job-9");
    bad["status"] = json!("DONE");
    processor
        .process_batch(vec![item(bad), item(crawl_result("job-10"))])
        .await;

    let rejects = store.rejects().await;
    assert_eq!(rejects.len(), 1);
    assert_eq!(rejects[0].identifier.as_deref(), Some("job-9"));
    assert_eq!(rejects[0].reject_reason, "invalid status: unknown status \"DONE\"");
    assert!(store.document("job-9").await.is_none());
    assert!(store.document("job-10").await.is_some());
}

#[tokio::test]
async fn test_malformed_lines_are_persisted_with_their_text() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{ not json").unwrap();
    writeln!(file, "{}", crawl_result("job-1")).unwrap();
    file.flush().unwrap();

    let store = Arc::new(MemoryDocumentStore::new());
    let mut config = test_config(1);
    config.persist_rejects = true;
    let processor = IngestionProcessor::new(store.clone(), config);

    let mut feed = JsonLinesFeed::open(file.path()).await.unwrap();
    processor.process_batch(feed.next_batch(10).await).await;

    let rejects = store.rejects().await;
    assert_eq!(rejects.len(), 1);
    assert_eq!(rejects[0].identifier, None);
    assert_eq!(rejects[0].raw, json!("{ not json"));
    assert!(rejects[0].reject_reason.starts_with("malformed input: line 1:"));
}

#[tokio::test]
async fn test_import_runs_the_lifecycle_to_completion() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for n in 0..9 {
        writeln!(file, "{}", crawl_result(&format!("job-{n}"))).unwrap();
    }
    file.flush().unwrap();

    let store = Arc::new(MemoryDocumentStore::new());
    let processor = IngestionProcessor::new(store.clone(), test_config(1));
    let mut outcomes = processor.subscribe().unwrap();

    processor
        .start_import(JsonLinesFeed::open(file.path()).await.unwrap())
        .await
        .unwrap();
    let summary = processor.wait_stopped().await;

    assert_eq!(processor.state(), ProcessorState::Stopped);
    assert_eq!(summary.received, 9);
    assert_eq!(summary.stored, 9);
    assert_eq!(drain_outcomes(&mut outcomes).len(), 9);
    assert_eq!(store.len().await, 9);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_import_settles_every_received_record() {
    let store = Arc::new(MemoryDocumentStore::with_latency(Duration::from_secs(1)));
    let mut config = test_config(1);
    config.batch_size = 2;
    let processor = IngestionProcessor::new(store.clone(), config);
    let mut outcomes = processor.subscribe().unwrap();

    let (tx, feed) = feed::channel(8);
    for n in 0..4 {
        tx.send(item(crawl_result(&format!("job-{n}")))).await.unwrap();
    }
    processor.start_import(feed).await.unwrap();
    // the second batch is only pulled once the first has settled
    wait_until_received(&processor, 4).await;

    let summary = processor.stop().await;

    assert_eq!(summary.received, 4);
    assert_eq!(summary.terminal(), 4);
    assert_eq!(summary.stored, 2);
    assert_eq!(summary.store_failed, 2);

    let outcomes = drain_outcomes(&mut outcomes);
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes[0].kind(), OutcomeKind::Stored);
    assert_eq!(outcomes[1].kind(), OutcomeKind::Stored);
    assert!(outcomes[2..]
        .iter()
        .all(|o| o.outcome == ProcessingOutcome::StoreFailed(StoreFailure::Shutdown)));
    assert_eq!(store.len().await, 2);
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn test_drained_import_finishes_the_batch_in_hand() {
    let store = Arc::new(MemoryDocumentStore::with_latency(Duration::from_millis(100)));
    let mut config = test_config(1);
    config.batch_size = 2;
    let processor = IngestionProcessor::new(store.clone(), config);

    let (tx, feed) = feed::channel(8);
    for n in 0..4 {
        tx.send(item(crawl_result(&format!("job-{n}")))).await.unwrap();
    }
    processor.start_import(feed).await.unwrap();
    wait_until_received(&processor, 2).await;

    let summary = processor.drain().await.unwrap();

    assert_eq!(processor.state(), ProcessorState::Stopped);
    assert_eq!(summary.received, 2);
    assert_eq!(summary.stored, 2);
    assert_eq!(summary.terminal(), 2);
    assert_eq!(store.len().await, 2);
    drop(tx);
}
