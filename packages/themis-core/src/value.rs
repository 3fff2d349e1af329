//! `Value`: the polymorphic tagged union stored in every entity field
//! (spec §3, §9 "Polymorphic `Value`").

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single field value. No runtime reflection: every variant is explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "v", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(std::collections::BTreeMap<String, Value>),
    /// GeoJSON geometry, stored as its JSON representation.
    Geometry(serde_json::Value),
    /// Dense embedding vector.
    Vector(Vec<f32>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Geometry(_) => "geometry",
            Value::Vector(_) => "vector",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(i) => Some(*i as f64),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Canonical byte encoding used both for content hashing (semantic cache
    /// keys, SAGA batch hashes) and as the *default* equality-index encoding.
    /// Order-preserving encodings for range scans live in `crate::keys`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        fn write(v: &Value, out: &mut Vec<u8>) {
            match v {
                Value::Null => out.push(0),
                Value::Bool(b) => {
                    out.push(1);
                    out.push(*b as u8);
                }
                Value::I64(i) => {
                    out.push(2);
                    out.extend_from_slice(&i.to_be_bytes());
                }
                Value::F64(f) => {
                    out.push(3);
                    out.extend_from_slice(&f.to_be_bytes());
                }
                Value::String(s) => {
                    out.push(4);
                    out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                Value::Bytes(b) => {
                    out.push(5);
                    out.extend_from_slice(&(b.len() as u64).to_be_bytes());
                    out.extend_from_slice(b);
                }
                Value::Array(items) => {
                    out.push(6);
                    out.extend_from_slice(&(items.len() as u64).to_be_bytes());
                    for item in items {
                        write(item, out);
                    }
                }
                Value::Object(map) => {
                    out.push(7);
                    out.extend_from_slice(&(map.len() as u64).to_be_bytes());
                    for (k, val) in map {
                        out.extend_from_slice(&(k.len() as u64).to_be_bytes());
                        out.extend_from_slice(k.as_bytes());
                        write(val, out);
                    }
                }
                Value::Geometry(g) => {
                    out.push(8);
                    let bytes = serde_json::to_vec(g).unwrap_or_default();
                    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
                Value::Vector(vec) => {
                    out.push(9);
                    out.extend_from_slice(&(vec.len() as u64).to_be_bytes());
                    for f in vec {
                        out.extend_from_slice(&f.to_be_bytes());
                    }
                }
            }
        }
        let mut out = Vec::new();
        write(self, &mut out);
        out
    }
}

/// Total order over `Value` used for `SORT` and for range-index encoding.
/// Cross-kind comparisons fall back to discriminant order (documented in
/// `keys::encode_range_component`); same-kind comparisons use natural order.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (I64(a), I64(b)) => a.partial_cmp(b),
            (F64(a), F64(b)) => a.partial_cmp(b),
            (I64(a), F64(b)) => (*a as f64).partial_cmp(b),
            (F64(a), I64(b)) => a.partial_cmp(&(*b as f64)),
            (String(a), String(b)) => a.partial_cmp(b),
            (Bytes(a), Bytes(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_distinguish_kinds_with_same_numeric_value() {
        let a = Value::I64(1).canonical_bytes();
        let b = Value::F64(1.0).canonical_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_bytes_are_deterministic() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("a".to_string(), Value::I64(1));
        map.insert("b".to_string(), Value::String("x".to_string()));
        let v = Value::Object(map);
        assert_eq!(v.canonical_bytes(), v.clone().canonical_bytes());
    }

    #[test]
    fn numeric_cross_kind_ordering_matches_value() {
        assert!(Value::I64(1) < Value::I64(2));
        assert!(Value::I64(1).partial_cmp(&Value::F64(1.5)) == Some(Ordering::Less));
    }
}
