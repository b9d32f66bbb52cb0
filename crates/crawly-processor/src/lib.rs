//! External Crawly Processor
//!
//! Ingests crawl results produced by an external crawler, validates and
//! normalizes them, and persists them idempotently in a document store keyed
//! by their identifier.
//!
//! # Components
//!
//! - **Record model** ([`record`]): raw input and the validated record
//! - **Validator** ([`validate`]): field checks and normalization
//! - **Store** ([`store`]): the document store seam plus the retrying adapter
//! - **Processor** ([`processor`]): lifecycle, worker pool and outcome reporting
//! - **Feeds** ([`feed`]): JSON-lines and in-process record sources
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use crawly_processor::config::PipelineConfig;
//! use crawly_processor::feed::JsonLinesFeed;
//! use crawly_processor::processor::IngestionProcessor;
//! use crawly_processor::store::MemoryDocumentStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryDocumentStore::new());
//!     let processor = IngestionProcessor::new(store, PipelineConfig::default());
//!     processor.start(JsonLinesFeed::open("results.jsonl").await?).await?;
//!     let summary = processor.wait_stopped().await;
//!     tracing::info!(stored = summary.stored, "done");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod dns;
pub mod error;
pub mod feed;
pub mod processor;
pub mod record;
pub mod store;
pub mod validate;

pub use config::{PipelineConfig, ProcessorConfig, StoreConfig};
pub use error::{
    MalformedInputError, ProcessorError, StartupError, StoreError, ValidationError,
    ValidationReason,
};
pub use processor::{
    IngestionProcessor, ProcessingOutcome, ProcessingSummary, ProcessorState, RecordOutcome,
};
pub use record::{CrawlResultRecord, CrawlStatus, RawRecord};
pub use store::{DocumentStore, MemoryDocumentStore, PgDocumentStore, StoreAdapter};
pub use validate::Validator;
