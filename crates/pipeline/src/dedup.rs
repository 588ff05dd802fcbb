//! Per-uid generation tracking for Deployments.

use kevents_core::{Notification, NotificationKind, Payload};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::filter::Predicate;

/// Highest accepted generation per uid, behind one lock.
#[derive(Debug, Default)]
pub struct GenerationFilter {
    generations: Mutex<FxHashMap<String, i64>>,
}

impl GenerationFilter {
    pub fn new() -> Self { Self::default() }

    /// Accept iff `generation` is strictly greater than the stored one
    /// (absent counts as below everything); the stored value is updated on accept.
    pub fn accept(&self, uid: &str, generation: i64) -> bool {
        let mut map = self.generations.lock();
        match map.get_mut(uid) {
            Some(stored) if *stored >= generation => false,
            Some(stored) => {
                *stored = generation;
                true
            }
            None => {
                map.insert(uid.to_string(), generation);
                true
            }
        }
    }

    pub fn forget(&self, uid: &str) -> Option<i64> { self.generations.lock().remove(uid) }

    pub fn generation(&self, uid: &str) -> Option<i64> { self.generations.lock().get(uid).copied() }

    pub fn len(&self) -> usize { self.generations.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Predicate for GenerationFilter {
    fn name(&self) -> &'static str { "deployment_generation" }

    /// Modified Deployments pass only with a new generation. Added seeds the
    /// map and Deleted evicts it; both always pass.
    fn test(&self, n: &Notification) -> bool {
        let Payload::Deployment(d) = &n.payload else { return true };
        let uid = d.metadata.uid.as_deref().unwrap_or("");
        let generation = d.metadata.generation.unwrap_or(0);
        match n.kind {
            NotificationKind::Modified => self.accept(uid, generation),
            NotificationKind::Added => {
                self.accept(uid, generation);
                true
            }
            NotificationKind::Deleted => {
                self.forget(uid);
                true
            }
            NotificationKind::Error => true,
        }
    }
}
