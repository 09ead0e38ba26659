//! Promise registry: allocation, pooling, resolution, lookup.
//!
//! Grounded on the teacher's `DashMap`-backed lookup tables
//! (`knhk-workflow-engine/src/cache.rs`) for the id→Promise map, with a
//! `parking_lot::Mutex`-guarded free list for pooling (the teacher reaches
//! for `parking_lot` wherever a short critical section needs a lock that
//! isn't already async-aware).

mod handle;

pub use handle::{Promise, PromiseId, PromiseResult, PromiseState};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Owns every live Promise for one Runtime. Not process-global (`spec.md`
/// §9): each `Runtime` owns its own registry and it is dropped with it.
pub struct PromiseRegistry {
    next_id: AtomicU64,
    table: DashMap<PromiseId, Arc<Promise>>,
    pool: Mutex<Vec<Arc<Promise>>>,
}

impl PromiseRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: DashMap::new(),
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Mint an id, take a structure from the pool (or allocate), reset its
    /// state, drain any stale signal, and insert into the lookup table.
    pub fn new_promise(&self) -> Arc<Promise> {
        let id = PromiseId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let promise = {
            let mut pool = self.pool.lock();
            match pool.pop() {
                Some(p) => {
                    p.reset(id);
                    p
                }
                None => Arc::new(Promise::new(id)),
            }
        };
        self.table.insert(id, promise.clone());
        promise
    }

    pub fn get(&self, id: PromiseId) -> Option<Arc<Promise>> {
        self.table.get(&id).map(|e| e.value().clone())
    }

    pub fn is_ready(&self, id: PromiseId) -> bool {
        self.table.get(&id).map(|p| p.is_ready()).unwrap_or(false)
    }

    pub fn result(&self, id: PromiseId) -> Option<PromiseResult> {
        self.table.get(&id).and_then(|p| p.result())
    }

    /// Detach from the lookup table and return the structure to the pool.
    pub fn remove(&self, id: PromiseId) -> Option<Arc<Promise>> {
        let removed = self.table.remove(&id).map(|(_, p)| p);
        if let Some(p) = &removed {
            let mut pool = self.pool.lock();
            // Bound the pool so a burst of one-off promises doesn't grow it
            // without limit; the registry's own table is intentionally
            // unbounded per spec.md §5 ("scripts under human authorship").
            if pool.len() < 1024 {
                pool.push(p.clone());
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

impl Default for PromiseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::marshal::Value;

    #[test]
    fn resolve_is_idempotent_and_readiness_is_monotonic() {
        let reg = PromiseRegistry::new();
        let p = reg.new_promise();
        assert!(!reg.is_ready(p.id()));
        assert!(reg.result(p.id()).is_none());

        p.resolve(vec![Value::Int(1)]);
        assert!(reg.is_ready(p.id()));
        let first = reg.result(p.id()).unwrap();

        // A second resolve is a silent no-op.
        p.resolve(vec![Value::Int(2)]);
        let second = reg.result(p.id()).unwrap();
        assert_eq!(first.values, second.values);
    }

    #[test]
    fn remove_returns_to_pool_and_reset_clears_state() {
        let reg = PromiseRegistry::new();
        let p1 = reg.new_promise();
        let id1 = p1.id();
        p1.resolve(vec![]);
        reg.remove(id1);
        assert!(reg.get(id1).is_none());

        let p2 = reg.new_promise();
        assert!(!p2.is_ready());
        assert!(p2.result().is_none());
    }

    #[test]
    fn reject_stores_error_and_no_values() {
        let reg = PromiseRegistry::new();
        let p = reg.new_promise();
        p.reject("boom".to_string());
        let result = reg.result(p.id()).unwrap();
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.values.is_empty());
    }
}
