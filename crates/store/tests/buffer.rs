#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kevents_core::{handoff, Record, ResourceKind, ResourceType, Severity, StopHandle, StreamHandle};
use kevents_store::{BufferConfig, MemorySink, RecordBuffer};
use tokio::sync::mpsc;

fn record(source: ResourceKind, uid: String) -> Record {
    Record {
        time: chrono::Utc::now(),
        severity: Severity::Info,
        name: "ResourceModified".into(),
        resource_name: uid.clone(),
        resource_namespace: "prod".into(),
        resource_uid: uid,
        resource_type: ResourceType::Deployment,
        message: String::new(),
        details: Default::default(),
        source,
    }
}

fn config() -> BufferConfig { BufferConfig { capacity: 500, flush_period: Duration::from_secs(30), min_batch_size: 10 } }

fn start(sink: &Arc<MemorySink>) -> (mpsc::Sender<Record>, RecordBuffer, StopHandle) {
    let (tx, rx) = handoff();
    let source_stop = StopHandle::new("records");
    let buffer = RecordBuffer::spawn(config(), sink.clone(), StreamHandle::new(rx, source_stop.clone()));
    (tx, buffer, source_stop)
}

async fn send(tx: &mpsc::Sender<Record>, range: std::ops::Range<usize>) {
    for i in range {
        tx.send(record(ResourceKind::Deployment, format!("d-{i:02}"))).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn flushes_only_once_minimum_is_reached() {
    let sink = Arc::new(MemorySink::new());
    let (tx, buffer, _) = start(&sink);

    send(&tx, 0..7).await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(buffer.pending(), 7);
    assert!(sink.batches().is_empty());

    send(&tx, 7..12).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, "deployments");
    let uids: Vec<String> = batches[0].1.iter().map(|r| r.resource_uid.clone()).collect();
    assert_eq!(uids, (0..12).map(|i| format!("d-{i:02}")).collect::<Vec<_>>());
    assert_eq!(buffer.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn nothing_flushes_before_the_first_period() {
    let sink = Arc::new(MemorySink::new());
    let (tx, buffer, _) = start(&sink);
    send(&tx, 0..20).await;
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(sink.is_empty());
    assert_eq!(buffer.pending(), 20);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn batch_is_split_per_collection() {
    let sink = Arc::new(MemorySink::new());
    let (tx, _buffer, _) = start(&sink);
    for i in 0..12 {
        let kind = if i % 3 == 0 { ResourceKind::Event } else { ResourceKind::ConfigMap };
        tx.send(record(kind, format!("r-{i:02}"))).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(31)).await;

    let batches = sink.batches();
    let collections: Vec<&str> = batches.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(collections, vec!["events", "configmaps"]);
    assert_eq!(batches[0].1.len(), 4);
    assert_eq!(batches[1].1.len(), 8);
    assert_eq!(batches[0].1[1].resource_uid, "r-03");
}

#[tokio::test(start_paused = true)]
async fn failed_inserts_are_dropped_not_requeued() {
    let sink = Arc::new(MemorySink::new());
    sink.set_fail_inserts(true);
    let (tx, buffer, _) = start(&sink);
    send(&tx, 0..10).await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(buffer.pending(), 0);

    sink.set_fail_inserts(false);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_halts_workers_and_upstream() {
    let sink = Arc::new(MemorySink::new());
    let (tx, buffer, source_stop) = start(&sink);
    send(&tx, 0..3).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(buffer.stop());
    assert!(!buffer.stop());
    assert!(source_stop.is_stopped());

    // The reader is gone, so the channel closes once its receiver drops.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(tx.send(record(ResourceKind::Node, "late".into())).await.is_err());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(sink.is_empty());
    assert_eq!(buffer.pending(), 3);
}

#[tokio::test(start_paused = true)]
async fn zero_flush_period_still_flushes() {
    let sink = Arc::new(MemorySink::new());
    let (tx, rx) = handoff();
    let config = BufferConfig { capacity: 4, flush_period: Duration::ZERO, min_batch_size: 1 };
    let buffer = RecordBuffer::spawn(config, sink.clone(), StreamHandle::new(rx, StopHandle::new("records")));

    send(&tx, 0..3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.len(), 3);
    assert_eq!(buffer.pending(), 0);
    assert!(buffer.stop());
}
