//! Ordered, short-circuiting predicate chain over a notification stream.

use std::sync::Arc;

use kevents_core::{handoff, Notification, StopHandle, StreamHandle};
use metrics::counter;
use tracing::{info, trace};

pub trait Predicate: Send + Sync {
    fn name(&self) -> &'static str;
    fn test(&self, n: &Notification) -> bool;
}

impl<P: Predicate + ?Sized> Predicate for Arc<P> {
    fn name(&self) -> &'static str { (**self).name() }
    fn test(&self, n: &Notification) -> bool { (**self).test(n) }
}

/// Predicate from a closure.
pub struct FnPredicate<F> {
    name: &'static str,
    f: F,
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Notification) -> bool + Send + Sync,
{
    fn name(&self) -> &'static str { self.name }
    fn test(&self, n: &Notification) -> bool { (self.f)(n) }
}

pub fn predicate<F>(name: &'static str, f: F) -> Box<dyn Predicate>
where
    F: Fn(&Notification) -> bool + Send + Sync + 'static,
{
    Box::new(FnPredicate { name, f })
}

pub struct FilterPipeline {
    predicates: Vec<Box<dyn Predicate>>,
}

impl FilterPipeline {
    pub fn new(predicates: Vec<Box<dyn Predicate>>) -> Self { Self { predicates } }

    pub fn len(&self) -> usize { self.predicates.len() }

    pub fn is_empty(&self) -> bool { self.predicates.is_empty() }

    /// Name of the first predicate rejecting `n`; later predicates are not
    /// evaluated.
    pub fn rejected_by(&self, n: &Notification) -> Option<&'static str> {
        self.predicates.iter().find(|p| !p.test(n)).map(|p| p.name())
    }

    pub fn passes(&self, n: &Notification) -> bool { self.rejected_by(n).is_none() }

    /// Spawn the read loop forwarding passing notifications.
    pub fn output(self, input: StreamHandle<Notification>) -> StreamHandle<Notification> {
        let (tx, rx) = handoff();
        let stop = StopHandle::with_children("filter_pipeline", vec![input.stop]);
        let token = stop.token();
        let mut input_rx = input.rx;
        tokio::spawn(async move {
            let (mut passed, mut filtered) = (0u64, 0u64);
            loop {
                let n = tokio::select! {
                    _ = token.cancelled() => break,
                    n = input_rx.recv() => match n { Some(n) => n, None => break },
                };
                if let Some(by) = self.rejected_by(&n) {
                    trace!(kind = %n.kind, resource = %n.resource_kind(), predicate = by, "filtered");
                    counter!("pipeline_filtered_total", 1, "predicate" => by);
                    filtered += 1;
                    continue;
                }
                counter!("pipeline_passed_total", 1);
                passed += 1;
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = tx.send(n) => if sent.is_err() { break },
                }
            }
            info!(passed, filtered, "filter pipeline stopped");
        });
        StreamHandle::new(rx, stop)
    }
}
