//! TimeoutHandle registry.
//!
//! A TimeoutHandle cross-links to a Promise: the firing task (a
//! `tokio::time::sleep`) and `cancel()` race on a single `AtomicU8` state
//! machine so that `fired` and `cancelled` can never both be observed true
//! (spec.md §8 invariant), collapsing the two-flag description in spec.md
//! §3 into one CAS site — documented as an implementation choice in
//! DESIGN.md.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::promise::{Promise, PromiseId, PromiseRegistry};
use crate::vm::marshal::Value;

const STATE_PENDING: u8 = 0;
const STATE_CANCELLED: u8 = 1;
const STATE_FIRED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(pub u64);

pub struct TimeoutHandle {
    id: TimeoutId,
    promise_id: PromiseId,
    state: AtomicU8,
}

impl TimeoutHandle {
    pub fn id(&self) -> TimeoutId {
        self.id
    }

    pub fn promise_id(&self) -> PromiseId {
        self.promise_id
    }

    /// Attempt to cancel. Returns true iff this call beat the firing side.
    pub fn cancel(&self, promises: &PromiseRegistry) -> bool {
        let won = self
            .state
            .compare_exchange(STATE_PENDING, STATE_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(p) = promises.get(self.promise_id) {
                resolve_cancelled(&p, true);
            }
        }
        won
    }

    fn fire(&self, promises: &PromiseRegistry) {
        let won = self
            .state
            .compare_exchange(STATE_PENDING, STATE_FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(p) = promises.get(self.promise_id) {
                resolve_cancelled(&p, false);
            }
        }
    }
}

fn resolve_cancelled(promise: &Promise, cancelled: bool) {
    let mut map = std::collections::BTreeMap::new();
    map.insert("cancelled".to_string(), Value::Bool(cancelled));
    promise.resolve(vec![Value::Map(map)]);
}

pub struct TimeoutRegistry {
    next_id: AtomicU64,
    table: DashMap<TimeoutId, Arc<TimeoutHandle>>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: DashMap::new(),
        }
    }

    /// Register a new timeout tied to `promise_id`. The caller is
    /// responsible for spawning the firing task (owned by
    /// [`crate::primitives::timeout`]) so this module stays free of a tokio
    /// runtime dependency at construction time.
    pub fn new_timeout(&self, promise_id: PromiseId) -> Arc<TimeoutHandle> {
        let id = TimeoutId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(TimeoutHandle {
            id,
            promise_id,
            state: AtomicU8::new(STATE_PENDING),
        });
        self.table.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: TimeoutId) -> Option<Arc<TimeoutHandle>> {
        self.table.get(&id).map(|e| e.value().clone())
    }

    pub fn fire(&self, id: TimeoutId, promises: &PromiseRegistry) {
        if let Some(h) = self.get(id) {
            h.fire(promises);
        }
        self.table.remove(&id);
    }

    pub fn remove(&self, id: TimeoutId) {
        self.table.remove(&id);
    }
}

impl Default for TimeoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_before_fire_wins() {
        let promises = PromiseRegistry::new();
        let timeouts = TimeoutRegistry::new();
        let p = promises.new_promise();
        let h = timeouts.new_timeout(p.id());

        assert!(h.cancel(&promises));
        let result = p.result().unwrap();
        assert_eq!(result.values.len(), 1);
        if let Value::Map(m) = &result.values[0] {
            assert_eq!(m.get("cancelled"), Some(&Value::Bool(true)));
        } else {
            panic!("expected map");
        }

        // Firing after cancel must not clobber the result or flip the flag.
        timeouts.fire(h.id(), &promises);
        let result2 = p.result().unwrap();
        if let Value::Map(m) = &result2.values[0] {
            assert_eq!(m.get("cancelled"), Some(&Value::Bool(true)));
        }
    }

    #[test]
    fn fire_before_cancel_wins() {
        let promises = PromiseRegistry::new();
        let timeouts = TimeoutRegistry::new();
        let p = promises.new_promise();
        let h = timeouts.new_timeout(p.id());

        h.fire(&promises);
        assert!(!h.cancel(&promises));
        let result = p.result().unwrap();
        if let Value::Map(m) = &result.values[0] {
            assert_eq!(m.get("cancelled"), Some(&Value::Bool(false)));
        } else {
            panic!("expected map");
        }
    }

    #[test]
    fn fired_and_cancelled_are_never_both_true() {
        let promises = PromiseRegistry::new();
        let timeouts = TimeoutRegistry::new();
        let p = promises.new_promise();
        let h = timeouts.new_timeout(p.id());

        let cancel_won = h.cancel(&promises);
        h.fire(&promises);
        // Exactly one of them should have "won" the state transition.
        assert!(cancel_won);
        assert_eq!(h.state.load(Ordering::Acquire), STATE_CANCELLED);
    }
}
