//! The Promise handle itself: id, state, readiness flag, result slot, and
//! the single-slot signal used by background watchers.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::vm::marshal::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// The result slot's contents once a Promise is ready. `error` is set for a
/// rejection; `values` carries the fulfilled values (empty on rejection).
#[derive(Debug, Clone, Default)]
pub struct PromiseResult {
    pub values: Vec<Value>,
    pub error: Option<String>,
}

struct Slot {
    state: PromiseState,
    result: PromiseResult,
}

pub struct Promise {
    id: Mutex<PromiseId>,
    ready: AtomicBool,
    slot: Mutex<Slot>,
    /// Fires (at most meaningfully) once per resolution, for background
    /// watchers that want to avoid polling (`await_all`/`await_any`).
    signal: Notify,
}

impl Promise {
    pub fn new(id: PromiseId) -> Self {
        Self {
            id: Mutex::new(id),
            ready: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                state: PromiseState::Pending,
                result: PromiseResult::default(),
            }),
            signal: Notify::new(),
        }
    }

    /// Reset to a fresh Pending state under a new id, for pool reuse.
    pub(crate) fn reset(&self, id: PromiseId) {
        *self.id.lock() = id;
        self.ready.store(false, Ordering::Release);
        let mut slot = self.slot.lock();
        slot.state = PromiseState::Pending;
        slot.result = PromiseResult::default();
        // Drain any stale permit so a watcher from the promise's previous
        // life doesn't observe a spurious wakeup.
        self.signal.notify_waiters();
    }

    pub fn id(&self) -> PromiseId {
        *self.id.lock()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PromiseState {
        self.slot.lock().state
    }

    pub fn result(&self) -> Option<PromiseResult> {
        if !self.is_ready() {
            return None;
        }
        Some(self.slot.lock().result.clone())
    }

    /// Resolve with fulfilled values. A no-op if already ready.
    pub fn resolve(&self, values: Vec<Value>) {
        self.complete(PromiseState::Fulfilled, PromiseResult { values, error: None });
    }

    /// Reject with an error message. A no-op if already ready.
    pub fn reject(&self, error: String) {
        self.complete(
            PromiseState::Rejected,
            PromiseResult { values: Vec::new(), error: Some(error) },
        );
    }

    fn complete(&self, state: PromiseState, result: PromiseResult) {
        // Readiness transitions false -> true exactly once; everything after
        // that is a silent no-op, per spec.md §4.1.
        if self
            .ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        {
            let mut slot = self.slot.lock();
            slot.state = state;
            slot.result = result;
        }
        // Single-slot semantics: senders don't block on a full channel, the
        // readiness flag is the authoritative indicator (spec.md §4.1).
        self.signal.notify_waiters();
    }

    /// Wait until this Promise becomes ready. Used by combinators instead of
    /// polling `is_ready` in a tight loop.
    pub async fn ready_notified(&self) {
        if self.is_ready() {
            return;
        }
        let notified = self.signal.notified();
        if self.is_ready() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_promise_is_pending() {
        let p = Promise::new(PromiseId(1));
        assert!(!p.is_ready());
        assert_eq!(p.state(), PromiseState::Pending);
        assert!(p.result().is_none());
    }

    #[tokio::test]
    async fn ready_notified_resolves_after_resolve() {
        let p = std::sync::Arc::new(Promise::new(PromiseId(2)));
        let p2 = p.clone();
        let handle = tokio::spawn(async move {
            p2.ready_notified().await;
        });
        tokio::task::yield_now().await;
        p.resolve(vec![]);
        handle.await.unwrap();
    }
}
