//! Record feeds
//!
//! A feed delivers raw records one at a time and signals exhaustion with
//! `None`. The processor pulls from it; a slow processor stalls the feed.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::error::MalformedInputError;
use crate::record::RawRecord;

/// Default cap on a single JSON line
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

pub type FeedItem = Result<RawRecord, MalformedInputError>;

/// Source of raw crawl results
#[async_trait]
pub trait RecordFeed: Send {
    /// `None` once the feed is exhausted
    async fn next_record(&mut self) -> Option<FeedItem>;

    /// Up to `max` items; empty once the feed is exhausted
    async fn next_batch(&mut self, max: usize) -> Vec<FeedItem> {
        let mut batch = Vec::with_capacity(max.min(1024));
        while batch.len() < max {
            match self.next_record().await {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        batch
    }
}

/// One JSON object per line. Blank lines are skipped.
pub struct JsonLinesFeed<R> {
    lines: FramedRead<R, LinesCodec>,
    line_no: u64,
    // FramedRead yields a single `None` after a codec error before it resumes
    resuming: bool,
    done: bool,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesFeed<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_line_length(reader, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_length(reader: R, max_line_bytes: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_bytes)),
            line_no: 0,
            resuming: false,
            done: false,
        }
    }
}

impl JsonLinesFeed<tokio::fs::File> {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(file))
    }
}

impl JsonLinesFeed<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> RecordFeed for JsonLinesFeed<R> {
    async fn next_record(&mut self) -> Option<FeedItem> {
        while !self.done {
            let line = match self.lines.next().await {
                None if self.resuming => {
                    self.resuming = false;
                    continue;
                },
                None => {
                    self.done = true;
                    return None;
                },
                Some(line) => line,
            };
            self.line_no += 1;

            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some(RawRecord::from_json_line(&line).map_err(|mut e| {
                        e.reason = format!("line {}: {}", self.line_no, e.reason);
                        e
                    }))
                },
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    self.resuming = true;
                    return Some(Err(MalformedInputError::new(format!(
                        "line {}: exceeds maximum line length",
                        self.line_no
                    ))));
                },
                Err(LinesCodecError::Io(e)) => {
                    warn!(line = self.line_no, error = %e, "Feed read failed, ending feed");
                    self.done = true;
                },
            }
        }
        None
    }
}

/// Feed backed by an in-process channel; ends when every sender is dropped
pub struct ChannelFeed {
    rx: mpsc::Receiver<FeedItem>,
}

/// Bounded channel feed; `send` waits while the feed is full
pub fn channel(capacity: usize) -> (mpsc::Sender<FeedItem>, ChannelFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelFeed { rx })
}

#[async_trait]
impl RecordFeed for ChannelFeed {
    async fn next_record(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }
}

/// Adapts any stream of feed items
pub struct StreamFeed {
    stream: Pin<Box<dyn Stream<Item = FeedItem> + Send>>,
}

impl StreamFeed {
    pub fn new(stream: impl Stream<Item = FeedItem> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
        }
    }

    pub fn from_records(records: impl IntoIterator<Item = RawRecord>) -> Self {
        let items: Vec<FeedItem> = records.into_iter().map(Ok).collect();
        Self::new(futures::stream::iter(items))
    }
}

#[async_trait]
impl RecordFeed for StreamFeed {
    async fn next_record(&mut self) -> Option<FeedItem> {
        self.stream.next().await
    }
}
