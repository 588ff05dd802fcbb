//! Explicit stop lifecycle shared by every pipeline component.
//!
//! A `StopHandle` moves `Open -> Stopping -> Stopped` exactly once under a
//! lock. The caller that wins the transition stops the handle's children
//! (in construction order) and cancels the token workers select on; every
//! other caller, concurrent or later, observes the transition as a no-op.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Open,
    Stopping,
    Stopped,
}

struct Inner {
    label: &'static str,
    state: Mutex<LifecycleState>,
    token: CancellationToken,
    children: Vec<StopHandle>,
}

/// Cloneable, idempotent stop handle.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .field("children", &self.inner.children.len())
            .finish()
    }
}

impl StopHandle {
    pub fn new(label: &'static str) -> Self { Self::with_children(label, Vec::new()) }

    /// Handle that stops `children` before cancelling its own workers.
    pub fn with_children(label: &'static str, children: Vec<StopHandle>) -> Self {
        Self {
            inner: Arc::new(Inner {
                label,
                state: Mutex::new(LifecycleState::Open),
                token: CancellationToken::new(),
                children,
            }),
        }
    }

    pub fn label(&self) -> &'static str { self.inner.label }

    pub fn state(&self) -> LifecycleState { *self.inner.state.lock() }

    pub fn is_stopped(&self) -> bool { self.state() == LifecycleState::Stopped }

    /// Token cancelled once the handle reaches `Stopped`.
    pub fn token(&self) -> CancellationToken { self.inner.token.clone() }

    /// Resolves once the handle is stopped.
    pub async fn stopped(&self) { self.inner.token.cancelled().await }

    /// Stop the component. Returns `true` only for the call that performed the
    /// transition. Concurrent callers block until the winner is done, so a
    /// `false` return still means the component is fully stopped.
    pub fn stop(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != LifecycleState::Open {
            return false;
        }
        *state = LifecycleState::Stopping;
        for child in &self.inner.children {
            child.stop();
        }
        self.inner.token.cancel();
        *state = LifecycleState::Stopped;
        debug!(component = self.inner.label, children = self.inner.children.len(), "stopped");
        true
    }
}
