//! Cancellation scopes.
//!
//! Grounded on the teacher's lock-free cancellation flag
//! (`knhk-workflow-engine/src/cancellation.rs`): a hot-path atomic check plus
//! hierarchical containment. Here the hierarchy is just parent/child rather
//! than named regions — every Runtime has one root scope, and every Stream /
//! BiStream / timeout gets a child scope so `close`/`cancel` only affects
//! itself, while cancelling the root cancels everything beneath it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    parent: Option<Scope>,
}

/// A cancellation scope. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
}

impl Scope {
    pub fn root() -> Self {
        Scope {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                parent: None,
            }),
        }
    }

    /// Create a child scope. Cancelling the parent cancels the child (checked
    /// lazily via `is_cancelled`); cancelling the child never affects the
    /// parent.
    pub fn child(&self) -> Self {
        Scope {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Lock-free check, including the parent chain.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match &self.inner.parent {
            Some(p) => p.is_cancelled(),
            None => false,
        }
    }

    /// Cancel this scope. Idempotent — a second call is a no-op.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Resolve once this scope (or an ancestor) is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_cancellation() {
        let root = Scope::root();
        let child = root.child();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancelling_child_does_not_cancel_parent() {
        let root = Scope::root();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let s = Scope::root();
        s.cancel();
        s.cancel();
        assert!(s.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let s = Scope::root();
        let s2 = s.clone();
        let handle = tokio::spawn(async move {
            s2.cancelled().await;
        });
        tokio::task::yield_now().await;
        s.cancel();
        handle.await.unwrap();
    }
}
