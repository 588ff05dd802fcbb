//! kube-events store: the sink contract plus the two workers that talk to it,
//! the batching record buffer and the retention cleaner.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kevents_core::Record;
use parking_lot::Mutex;

pub mod buffer;
pub mod cleaner;

pub use buffer::{BufferConfig, RecordBuffer};
pub use cleaner::{CleanerConfig, RecordCleaner};

/// Shortest timer period the workers run with; zero is raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,
    #[error("{op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("sink worker failed: {0}")]
    Worker(String),
}

impl SinkError {
    pub fn backend(op: &'static str, e: impl std::error::Error + Send + Sync + 'static) -> Self {
        SinkError::Backend { op, source: Box::new(e) }
    }
}

/// Durable record storage partitioned into collections.
///
/// `bulk_insert` is unordered: rows violating a uniqueness rule are skipped
/// and the rest still land. `cleanup` removes every record whose time is at
/// or before `older_than` and reports how many went.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn bulk_insert(&self, records: Vec<Record>, collection: &str) -> Result<(), SinkError>;
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, SinkError>;
    async fn close(&self) -> Result<(), SinkError>;
}

/// In-process sink keeping every insert call; used by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<(String, Vec<Record>)>>,
    fail_inserts: AtomicBool,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    /// Insert calls in arrival order, as (collection, records).
    pub fn batches(&self) -> Vec<(String, Vec<Record>)> { self.batches.lock().clone() }

    pub fn records(&self) -> Vec<Record> { self.batches.lock().iter().flat_map(|(_, b)| b.iter().cloned()).collect() }

    pub fn len(&self) -> usize { self.batches.lock().iter().map(|(_, b)| b.len()).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn set_fail_inserts(&self, fail: bool) { self.fail_inserts.store(fail, Ordering::SeqCst) }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn bulk_insert(&self, records: Vec<Record>, collection: &str) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(SinkError::Worker(format!("insert into {collection} refused")));
        }
        self.batches.lock().push((collection.to_string(), records));
        Ok(())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        let mut removed = 0u64;
        let mut batches = self.batches.lock();
        for (_, batch) in batches.iter_mut() {
            let before = batch.len();
            batch.retain(|r| r.time > older_than);
            removed += (before - batch.len()) as u64;
        }
        batches.retain(|(_, b)| !b.is_empty());
        Ok(removed)
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
