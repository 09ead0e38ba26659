//! `json_encode`/`json_decode`: synchronous, never suspend.

use crate::error::{RuntimeError, RuntimeResult};
use crate::vm::marshal::{self, Value};

pub fn json_encode(value: &Value) -> String {
    serde_json::to_string(&marshal::value_to_json(value)).unwrap_or_else(|_| "null".to_string())
}

pub fn json_decode(text: &str) -> RuntimeResult<Value> {
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|e| RuntimeError::validation(format!("invalid json: {e}")))?;
    Ok(marshal::json_to_value(&parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn encode_then_decode_preserves_a_map() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        let value = Value::Map(map);
        let text = json_encode(&value);
        assert_eq!(json_decode(&text).unwrap(), value);
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let err = json_decode("{not json").unwrap_err();
        assert!(matches!(err, RuntimeError::Validation(_)));
    }
}
