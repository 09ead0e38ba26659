//! `time()`/`parse_time(text)`: wall-clock helpers. Synchronous.

use chrono::{DateTime, Utc};

use crate::error::{RuntimeError, RuntimeResult};
use crate::vm::marshal::Value;

/// Current time as milliseconds since the Unix epoch.
pub fn time() -> Value {
    Value::Int(Utc::now().timestamp_millis())
}

/// Parse an RFC 3339 timestamp into milliseconds since the Unix epoch.
pub fn parse_time(text: &str) -> RuntimeResult<Value> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| Value::Int(dt.with_timezone(&Utc).timestamp_millis()))
        .map_err(|e| RuntimeError::validation(format!("invalid timestamp: {e}")))
}
