//! Batching buffer between the classifier and the sink.

use std::sync::Arc;
use std::time::Duration;

use kevents_core::{Record, StopHandle, StreamHandle};
use metrics::counter;
use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::{RecordSink, MIN_PERIOD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Initial capacity of each fresh batch.
    pub capacity: usize,
    pub flush_period: Duration,
    /// Ticks with fewer pending records leave the batch accumulating.
    pub min_batch_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self { Self { capacity: 500, flush_period: Duration::from_secs(30), min_batch_size: 10 } }
}

pub struct RecordBuffer {
    active: Arc<Mutex<Vec<Record>>>,
    stop: StopHandle,
    config: BufferConfig,
}

impl RecordBuffer {
    /// Start the reader and the flusher. The first flush check happens one
    /// period after start. Stopping the buffer stops `source` too.
    pub fn spawn(config: BufferConfig, sink: Arc<dyn RecordSink>, source: StreamHandle<Record>) -> Self {
        let active = Arc::new(Mutex::new(Vec::with_capacity(config.capacity)));
        let stop = StopHandle::with_children("record_buffer", vec![source.stop]);
        info!(
            component = "record_buffer",
            capacity = config.capacity,
            min_batch_size = config.min_batch_size,
            flush_secs = config.flush_period.as_secs(),
            "starting"
        );

        let token = stop.token();
        let reader_active = Arc::clone(&active);
        let mut rx = source.rx;
        tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    _ = token.cancelled() => break,
                    r = rx.recv() => match r { Some(r) => r, None => break },
                };
                reader_active.lock().push(record);
                counter!("buffer_records_total", 1);
            }
            debug!(component = "record_buffer", "reader stopped");
        });

        let token = stop.token();
        let flush_active = Arc::clone(&active);
        tokio::spawn(async move {
            let period = config.flush_period.max(MIN_PERIOD);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(batch) = take_batch(&flush_active, &config) else { continue };
                counter!("buffer_flush_total", 1);
                debug!(component = "record_buffer", records = batch.len(), "flushing");
                tokio::spawn(insert_batch(Arc::clone(&sink), batch));
            }
            debug!(component = "record_buffer", "flusher stopped");
        });

        Self { active, stop, config }
    }

    /// Records accumulated since the last flush.
    pub fn pending(&self) -> usize { self.active.lock().len() }

    pub fn config(&self) -> &BufferConfig { &self.config }

    pub fn stop_handle(&self) -> StopHandle { self.stop.clone() }

    /// Halt reader and flusher. Pending records are dropped and in-flight
    /// inserts run to completion on their own.
    pub fn stop(&self) -> bool { self.stop.stop() }
}

/// Swap out the active batch if it reached the minimum size. The lock is
/// released before the caller does any I/O.
fn take_batch(active: &Mutex<Vec<Record>>, config: &BufferConfig) -> Option<Vec<Record>> {
    let mut guard = active.lock();
    if guard.is_empty() || guard.len() < config.min_batch_size {
        return None;
    }
    Some(std::mem::replace(&mut *guard, Vec::with_capacity(config.capacity)))
}

/// Split by collection keeping arrival order inside each group.
pub(crate) fn group_by_collection(batch: Vec<Record>) -> Vec<(&'static str, Vec<Record>)> {
    let mut groups: Vec<(&'static str, Vec<Record>)> = Vec::new();
    for record in batch {
        let collection = record.collection();
        match groups.iter_mut().find(|(c, _)| *c == collection) {
            Some((_, g)) => g.push(record),
            None => groups.push((collection, vec![record])),
        }
    }
    groups
}

async fn insert_batch(sink: Arc<dyn RecordSink>, batch: Vec<Record>) {
    for (collection, records) in group_by_collection(batch) {
        let n = records.len();
        if let Err(e) = sink.bulk_insert(records, collection).await {
            error!(component = "record_buffer", collection, records = n, error = %e, "bulk insert failed");
            counter!("buffer_insert_errors_total", 1, "collection" => collection);
        }
    }
}
