//! Value marshalling between host values and Luau tables/primitives.
//!
//! Preserves the lattice named in `spec.md` §9: `nil`, `bool`, `int` (64-bit),
//! `float` (64-bit), `string` (byte-transparent), `bytes`, homogeneous
//! arrays, and maps with string keys. Arrays vs. maps are distinguished by
//! consecutive 1-based integer keys covering `[1..n]` (§9).
//!
//! Luau (via `mlua`) represents all non-integer numbers as 64-bit floats;
//! `Value::Int` round-trips through Lua as a float when it does not fit
//! exactly in the 53-bit mantissa. This is the one accepted lossy edge of
//! the marshalling layer and is documented in DESIGN.md.
//!
//! `Value::Bytes` survives a JSON round trip base64-encoded, same as
//! `knhk-admission`'s own use of the `base64` crate for binary payloads.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mlua::{Lua, Value as LuaValue, Variadic};

use crate::error::{RuntimeError, RuntimeResult};

/// A host-side value in the supported marshalling lattice.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn nil() -> Self {
        Value::Nil
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

/// Convert a host value into a `mlua::Value` living in `lua`.
pub fn to_lua(lua: &Lua, value: &Value) -> RuntimeResult<LuaValue> {
    match value {
        Value::Nil => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Int(n) => Ok(LuaValue::Number(*n as f64)),
        Value::Float(n) => Ok(LuaValue::Number(*n)),
        Value::Str(s) => lua.create_string(s).map(LuaValue::String).map_err(RuntimeError::from),
        Value::Bytes(b) => lua.create_string(b).map(LuaValue::String).map_err(RuntimeError::from),
        Value::Array(items) => {
            let table = lua.create_table().map_err(RuntimeError::from)?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, to_lua(lua, item)?).map_err(RuntimeError::from)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Map(map) => {
            let table = lua.create_table().map_err(RuntimeError::from)?;
            for (k, v) in map.iter() {
                table.set(k.as_str(), to_lua(lua, v)?).map_err(RuntimeError::from)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// Convert a `mlua::Value` back into a host value.
///
/// Arrays vs. maps: a table whose integer keys `1..=n` cover every entry
/// (and nothing else) round-trips as `Value::Array`; any other table
/// (string keys, or a sparse/mixed table) round-trips as `Value::Map`,
/// dropping non-string keys — the spec only commits to string-keyed maps.
pub fn from_lua(value: &LuaValue) -> RuntimeResult<Value> {
    match value {
        LuaValue::Nil => Ok(Value::Nil),
        LuaValue::Boolean(b) => Ok(Value::Bool(*b)),
        LuaValue::Integer(n) => Ok(Value::Int(*n as i64)),
        LuaValue::Number(n) => Ok(Value::Float(*n)),
        LuaValue::String(s) => {
            let bytes = s.as_bytes();
            match std::str::from_utf8(&bytes) {
                Ok(text) => Ok(Value::Str(text.to_string())),
                Err(_) => Ok(Value::Bytes(bytes.to_vec())),
            }
        }
        LuaValue::Table(t) => table_to_value(t),
        LuaValue::Function(_) | LuaValue::Thread(_) | LuaValue::UserData(_) | LuaValue::LightUserData(_) => {
            Ok(Value::Nil)
        }
        LuaValue::Error(e) => Ok(Value::Str(e.to_string())),
    }
}

fn table_to_value(t: &mlua::Table) -> RuntimeResult<Value> {
    let len = t.raw_len() as i64;
    let mut is_dense_array = len > 0;
    let mut count = 0i64;
    for pair in t.clone().pairs::<LuaValue, LuaValue>() {
        let (k, _) = pair.map_err(RuntimeError::from)?;
        count += 1;
        match &k {
            LuaValue::Integer(i) if *i >= 1 && *i <= len => {}
            _ => {
                is_dense_array = false;
            }
        }
    }
    if is_dense_array && count == len {
        let mut items = Vec::with_capacity(len as usize);
        for i in 1..=len {
            let v: LuaValue = t.get(i).map_err(RuntimeError::from)?;
            items.push(from_lua(&v)?);
        }
        return Ok(Value::Array(items));
    }

    let mut map = BTreeMap::new();
    for pair in t.clone().pairs::<LuaValue, LuaValue>() {
        let (k, v) = pair.map_err(RuntimeError::from)?;
        if let LuaValue::String(s) = &k {
            if let Ok(key) = s.to_str() {
                map.insert(key.to_string(), from_lua(&v)?);
            }
        }
    }
    Ok(Value::Map(map))
}

/// Convert a host value to JSON, for the `json_encode`/`json_decode` builtins
/// and for tagging `MessageChunk`s.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                obj.insert(k.clone(), value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => {
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), json_to_value(v));
            }
            Value::Map(map)
        }
    }
}

/// Collect a `Variadic<LuaValue>` (as received by a native function) into
/// host values, in order.
pub fn variadic_to_values(args: &Variadic<LuaValue>) -> RuntimeResult<Vec<Value>> {
    args.iter().map(from_lua).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_shape() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::Array(vec![Value::Bool(true), Value::Nil]));
        let value = Value::Map(map);
        let json = value_to_json(&value);
        let back = json_to_value(&json);
        assert_eq!(value, back);
    }

    #[test]
    fn bytes_values_encode_as_base64_in_json() {
        let value = Value::Bytes(b"hello".to_vec());
        let json = value_to_json(&value);
        assert_eq!(json, serde_json::Value::String(BASE64.encode(b"hello")));
    }
}
