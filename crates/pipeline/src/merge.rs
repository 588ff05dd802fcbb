//! Fan-in of independent notification streams.

use kevents_core::{handoff, Notification, StopHandle, StreamHandle};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Merge `sources` into one stream.
///
/// Every source gets a dedicated forwarding task, so order within a source is
/// kept; across sources the interleaving is arbitrary. The forwarders form a
/// task group: a supervisor awaits all of them and only then drops the last
/// output sender, so the merged stream ends after every source ended.
/// Stopping the returned handle stops every source.
pub fn merge(sources: Vec<StreamHandle<Notification>>) -> StreamHandle<Notification> {
    let (tx, rx) = handoff();
    let children = sources.iter().map(|s| s.stop.clone()).collect();
    let stop = StopHandle::with_children("merged_watch", children);
    let token = stop.token();
    let count = sources.len();

    let mut group = JoinSet::new();
    for (idx, source) in sources.into_iter().enumerate() {
        let tx = tx.clone();
        let token = token.clone();
        let mut source_rx = source.rx;
        group.spawn(async move {
            let mut forwarded = 0u64;
            loop {
                let n = tokio::select! {
                    _ = token.cancelled() => break,
                    n = source_rx.recv() => match n { Some(n) => n, None => break },
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = tx.send(n) => if sent.is_err() { break },
                }
                forwarded += 1;
            }
            (idx, forwarded)
        });
    }

    tokio::spawn(async move {
        while let Some(res) = group.join_next().await {
            match res {
                Ok((source, forwarded)) => debug!(source, forwarded, "merge: source drained"),
                Err(e) => warn!(error = %e, "merge: forwarder failed"),
            }
        }
        drop(tx);
        info!(sources = count, "merge: output closed");
    });

    StreamHandle::new(rx, stop)
}
