//! KVS: a string-keyed map with no TTL and runtime-lifetime semantics
//! (`spec.md` §3). Synchronous — never suspends the calling thread.

use dashmap::DashMap;

use crate::vm::marshal::Value;

#[derive(Default)]
pub struct Kvs {
    table: DashMap<String, Value>,
}

impl Kvs {
    pub fn new() -> Self {
        Self { table: DashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.table.get(key).map(|e| e.value().clone())
    }

    pub fn set(&self, key: String, value: Value) {
        self.table.insert(key, value);
    }

    pub fn del(&self, key: &str) -> Option<Value> {
        self.table.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let kvs = Kvs::new();
        kvs.set("a".to_string(), Value::Int(1));
        assert_eq!(kvs.get("a"), Some(Value::Int(1)));
    }

    #[test]
    fn del_removes_and_returns_previous_value() {
        let kvs = Kvs::new();
        kvs.set("a".to_string(), Value::Bool(true));
        assert_eq!(kvs.del("a"), Some(Value::Bool(true)));
        assert_eq!(kvs.get("a"), None);
    }

    #[test]
    fn missing_key_is_nil_not_an_error() {
        let kvs = Kvs::new();
        assert_eq!(kvs.get("missing"), None);
    }
}
