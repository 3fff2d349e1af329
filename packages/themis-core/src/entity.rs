//! `Entity`: the universal record (spec §3).

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMeta {
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub ttl_expiry_ms: Option<i64>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub table: String,
    pub pk: String,
    pub fields: BTreeMap<String, Value>,
    pub meta: EntityMeta,
}

impl Entity {
    pub fn new(table: impl Into<String>, pk: impl Into<String>, now_ms: i64) -> Self {
        Self {
            table: table.into(),
            pk: pk.into(),
            fields: BTreeMap::new(),
            meta: EntityMeta {
                created_at_ms: now_ms,
                updated_at_ms: now_ms,
                ttl_expiry_ms: None,
                version: 1,
            },
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Graph edges are entities carrying the reserved fields `_from`/`_to`
    /// (spec §3 invariants).
    pub fn is_edge(&self) -> bool {
        self.fields.contains_key("_from") && self.fields.contains_key("_to")
    }

    pub fn edge_from(&self) -> Option<&str> {
        self.fields.get("_from").and_then(Value::as_str)
    }

    pub fn edge_to(&self) -> Option<&str> {
        self.fields.get("_to").and_then(Value::as_str)
    }

    pub fn edge_type(&self) -> Option<&str> {
        self.fields.get("type").and_then(Value::as_str)
    }

    pub fn edge_weight(&self) -> f64 {
        self.fields.get("weight").and_then(Value::as_f64).unwrap_or(1.0)
    }

    /// Canonical serialized bytes used for the Entity Store's physical
    /// representation. Deterministic field ordering (`BTreeMap`) gives
    /// byte-stable round trips (spec §8 "round-trip / idempotence").
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_canonical_bytes() {
        let e = Entity::new("users", "u1", 1000)
            .with_field("city", Value::String("Berlin".into()))
            .with_field("stars", Value::I64(4));
        let bytes = e.to_canonical_bytes().unwrap();
        let back = Entity::from_canonical_bytes(&bytes).unwrap();
        assert_eq!(e.to_canonical_bytes().unwrap(), back.to_canonical_bytes().unwrap());
    }

    #[test]
    fn edge_detection_requires_both_reserved_fields() {
        let e = Entity::new("edges", "e1", 0).with_field("_from", Value::String("a".into()));
        assert!(!e.is_edge());
        let e = e.with_field("_to", Value::String("b".into()));
        assert!(e.is_edge());
    }
}
