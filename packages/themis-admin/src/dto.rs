//! Wire-format conversions between the engine's internal `Value` and plain
//! JSON, plus the `{kind, message, details}` error envelope callers of the
//! facade (and, through it, the HTTP transport) see (spec §6, §7).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use themis_core::error::{ErrorKind, ThemisError};
use themis_core::value::Value;

/// Serialized error shape handed back across the facade boundary. The facade
/// itself still propagates `themis_core::error::Result`; this is the DTO a
/// caller-facing layer (HTTP handlers, the CLI) renders it into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl From<&ThemisError> for ErrorBody {
    fn from(e: &ThemisError) -> Self {
        ErrorBody { kind: e.kind(), message: e.to_string(), details: None }
    }
}

impl From<ThemisError> for ErrorBody {
    fn from(e: ThemisError) -> Self {
        ErrorBody::from(&e)
    }
}

/// Converts a `Value` into plain `serde_json::Value` for a friendlier wire
/// format than `Value`'s own tagged encoding (`{"type": "...", "v": ...}`).
/// `Bytes` becomes a base64-less hex string (no extra dependency for a
/// single call site) and `Vector` becomes a plain JSON number array.
pub fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::I64(i) => serde_json::Value::from(*i),
        Value::F64(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(hex_encode(b)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Object(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect())
        }
        Value::Geometry(g) => g.clone(),
        Value::Vector(vec) => {
            serde_json::Value::Array(vec.iter().map(|f| serde_json::Number::from_f64(*f as f64).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)).collect())
        }
    }
}

/// Inverse of [`value_to_json`]. JSON has no way to distinguish an integer
/// from a float or a string from a hex-encoded byte string, so this always
/// produces `I64`/`F64`/`String`/`Array`/`Object`/`Null` -- a field that must
/// round-trip as `Bytes` or `Vector` needs an explicit conversion at the
/// call site (`fulltext_search`/`vector_search` bind vars do this).
pub fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::I64(i)
            } else {
                Value::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect::<BTreeMap<_, _>>())
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Request body for `fusion_search`: text query plus vector query, combined
/// with one of the two ranking strategies (spec §4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct FusionSearchRequest {
    pub table: String,
    pub text_column: String,
    pub text_query: String,
    pub vector_column: String,
    pub vector_query: Vec<f32>,
    pub top_k: usize,
    #[serde(default)]
    pub strategy: FusionStrategyDto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionStrategyDto {
    Rrf { #[serde(default = "default_k_rrf")] k_rrf: f64 },
    Weighted { weight_text: f64 },
}

fn default_k_rrf() -> f64 {
    60.0
}

impl Default for FusionStrategyDto {
    fn default() -> Self {
        FusionStrategyDto::Rrf { k_rrf: default_k_rrf() }
    }
}

impl From<FusionStrategyDto> for themis_query::FusionStrategy {
    fn from(dto: FusionStrategyDto) -> Self {
        match dto {
            FusionStrategyDto::Rrf { k_rrf } => themis_query::FusionStrategy::Rrf { k_rrf },
            FusionStrategyDto::Weighted { weight_text } => themis_query::FusionStrategy::Weighted { weight_text },
        }
    }
}

/// Aggregate health/introspection surface returned by `stats()` (spec §6, §7
/// degraded-mode flag).
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub index_count: usize,
    pub open_transaction_count: usize,
    pub changefeed_next_seq: u64,
    pub degraded: bool,
    pub consecutive_storage_failures: u32,
    pub fusion_cache_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_json_round_trips_for_json_native_kinds() {
        let mut obj = BTreeMap::new();
        obj.insert("a".to_string(), Value::I64(1));
        obj.insert("b".to_string(), Value::String("x".into()));
        let v = Value::Object(obj);
        let json = value_to_json(&v);
        assert_eq!(json_to_value(&json), v);
    }

    #[test]
    fn bytes_are_hex_encoded() {
        let v = Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(value_to_json(&v), serde_json::Value::String("deadbeef".to_string()));
    }
}
