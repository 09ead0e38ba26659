//! `MessageChunk`: the tagged structure carried by Stream/BiStream `recv`
//! and `send`.

use std::collections::BTreeMap;

use crate::vm::marshal::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkPart {
    Text(String),
    Blob { mime: String, data: Vec<u8> },
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunk {
    pub part: ChunkPart,
    pub stream_id: Option<u64>,
    pub is_bos: bool,
    pub is_eos: bool,
}

impl MessageChunk {
    pub fn text(s: impl Into<String>) -> Self {
        Self { part: ChunkPart::Text(s.into()), stream_id: None, is_bos: false, is_eos: false }
    }

    /// Marshal into a Luau-bound table shape (`{ part = {...}, stream_id?,
    /// is_bos?, is_eos? }`).
    pub fn to_value(&self) -> Value {
        let mut part_map = BTreeMap::new();
        match &self.part {
            ChunkPart::Text(s) => {
                part_map.insert("type".to_string(), Value::Str("text".to_string()));
                part_map.insert("text".to_string(), Value::Str(s.clone()));
            }
            ChunkPart::Blob { mime, data } => {
                part_map.insert("type".to_string(), Value::Str("blob".to_string()));
                part_map.insert("mime".to_string(), Value::Str(mime.clone()));
                part_map.insert("data".to_string(), Value::Bytes(data.clone()));
            }
            ChunkPart::Structured(v) => {
                part_map.insert("type".to_string(), Value::Str("structured".to_string()));
                part_map.insert("value".to_string(), v.clone());
            }
        }

        let mut outer = BTreeMap::new();
        outer.insert("part".to_string(), Value::Map(part_map));
        if let Some(id) = self.stream_id {
            outer.insert("stream_id".to_string(), Value::Int(id as i64));
        }
        outer.insert("is_bos".to_string(), Value::Bool(self.is_bos));
        outer.insert("is_eos".to_string(), Value::Bool(self.is_eos));
        Value::Map(outer)
    }

    /// Best-effort conversion from a script-provided table. Recognises
    /// `part.type ∈ {"text", "blob"}` explicitly; anything else is carried
    /// through as `Structured`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let outer = value.as_map()?;
        let part_value = outer.get("part")?;
        let part_map = part_value.as_map();
        let part = match part_map.and_then(|m| m.get("type")).and_then(Value::as_str) {
            Some("text") => {
                let text = part_map
                    .and_then(|m| m.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                ChunkPart::Text(text)
            }
            Some("blob") => {
                let mime = part_map
                    .and_then(|m| m.get("mime"))
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = match part_map.and_then(|m| m.get("data")) {
                    Some(Value::Bytes(b)) => b.clone(),
                    Some(Value::Str(s)) => s.clone().into_bytes(),
                    _ => Vec::new(),
                };
                ChunkPart::Blob { mime, data }
            }
            _ => ChunkPart::Structured(part_value.clone()),
        };

        let stream_id = outer.get("stream_id").and_then(|v| match v {
            Value::Int(n) => Some(*n as u64),
            Value::Float(n) => Some(*n as u64),
            _ => None,
        });
        let is_bos = matches!(outer.get("is_bos"), Some(Value::Bool(true)));
        let is_eos = matches!(outer.get("is_eos"), Some(Value::Bool(true)));

        Some(Self { part, stream_id, is_bos, is_eos })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_chunk_round_trips() {
        let chunk = MessageChunk { stream_id: Some(7), is_bos: true, ..MessageChunk::text("hi") };
        let value = chunk.to_value();
        let back = MessageChunk::from_value(&value).unwrap();
        assert_eq!(chunk, back);
    }

    #[test]
    fn unknown_part_type_falls_back_to_structured() {
        let mut part = BTreeMap::new();
        part.insert("type".to_string(), Value::Str("weird".to_string()));
        part.insert("x".to_string(), Value::Int(1));
        let mut outer = BTreeMap::new();
        outer.insert("part".to_string(), Value::Map(part));
        let value = Value::Map(outer);
        let chunk = MessageChunk::from_value(&value).unwrap();
        assert!(matches!(chunk.part, ChunkPart::Structured(_)));
    }
}
