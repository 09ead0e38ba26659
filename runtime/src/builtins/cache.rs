//! Cache: like the KVS but with an optional per-entry TTL and lazy expiry.
//! A read past its TTL removes the entry under the writer lock at the
//! moment the miss is observed (`spec.md` §5 locking discipline) rather
//! than via a background sweep.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::vm::marshal::Value;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(t) if now >= t)
    }
}

#[derive(Default)]
pub struct Cache {
    table: DashMap<String, Entry>,
}

impl Cache {
    pub fn new() -> Self {
        Self { table: DashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        if let Some(entry) = self.table.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // Expired: drop the entry now that the read has observed staleness.
        self.table.remove(key);
        None
    }

    /// `ttl_ms = None` means no expiry.
    pub fn set(&self, key: String, value: Value, ttl_ms: Option<u64>) {
        let expires_at = ttl_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        self.table.insert(key, Entry { value, expires_at });
    }

    pub fn del(&self, key: &str) -> Option<Value> {
        self.table.remove(key).map(|(_, e)| e.value)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn entries_without_ttl_never_expire() {
        let cache = Cache::new();
        cache.set("a".to_string(), Value::Int(1), None);
        assert_eq!(cache.get("a"), Some(Value::Int(1)));
    }

    #[test]
    fn expired_entry_reads_as_miss_and_is_evicted() {
        let cache = Cache::new();
        cache.set("a".to_string(), Value::Int(1), Some(1));
        sleep(Duration::from_millis(5));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn del_returns_previous_value() {
        let cache = Cache::new();
        cache.set("a".to_string(), Value::Str("x".to_string()), None);
        assert_eq!(cache.del("a"), Some(Value::Str("x".to_string())));
    }
}
