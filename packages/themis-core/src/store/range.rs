//! Range index reads (spec §4.4): inclusive/exclusive bound scans over a
//! single column, returning primary keys in value order.

use crate::error::Result;
use crate::keys;
use crate::kv::KvEngine;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct RangeBound {
    pub value: Value,
    pub inclusive: bool,
}

/// Scans `table.column`'s range index between optional lower/upper bounds.
/// `None` on either side means unbounded in that direction.
pub fn scan(
    engine: &dyn KvEngine,
    table: &str,
    column: &str,
    lower: Option<&RangeBound>,
    upper: Option<&RangeBound>,
) -> Result<Vec<(Value, String)>> {
    let column_prefix = keys::range_index_column_prefix(table, column);
    let lower_key = match lower {
        Some(b) => {
            let mut k = keys::range_index_bound(table, column, &b.value);
            if !b.inclusive {
                k = keys::prefix_upper_bound(&k);
            }
            k
        }
        None => column_prefix.clone(),
    };
    let upper_key = match upper {
        Some(b) => {
            let bound = keys::range_index_bound(table, column, &b.value);
            if b.inclusive {
                keys::prefix_upper_bound(&bound)
            } else {
                bound
            }
        }
        None => keys::prefix_upper_bound(&column_prefix),
    };

    let rows = engine.scan_range(&lower_key, &upper_key)?;
    let mut out = Vec::with_capacity(rows.len());
    for (k, _) in rows {
        let (value, pk) = decode_row(&k, &column_prefix)?;
        out.push((value, pk));
    }
    Ok(out)
}

/// Finds the byte offset of the first raw (unescaped) `:` at or after
/// `start`. Every variable-length value component is escaped on write
/// (`keys::encode_range_component`), so this boundary is always the real
/// separator between the value and the trailing primary key.
fn find_unescaped_separator(data: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < data.len() {
        if data[i] == 0x01 {
            i += 2;
        } else if data[i] == b':' {
            return i;
        } else {
            i += 1;
        }
    }
    data.len()
}

fn decode_row(key: &[u8], column_prefix: &[u8]) -> Result<(Value, String)> {
    let rest = &key[column_prefix.len()..];
    let discriminant = rest[0];
    let (value, consumed) = match discriminant {
        0 => (Value::Null, 1),
        1 => (Value::Bool(rest[1] != 0), 2),
        2 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&rest[1..9]);
            (Value::I64(keys::decode_i64_ordered(buf)), 9)
        }
        3 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&rest[1..9]);
            (Value::F64(keys::decode_f64_ordered(buf)), 9)
        }
        4 | 5 | 6 => {
            let sep_pos = find_unescaped_separator(rest, 1);
            let raw = keys::unescape_bytes(&rest[1..sep_pos]);
            let value = match discriminant {
                4 => Value::String(String::from_utf8_lossy(&raw).into_owned()),
                5 => Value::Bytes(raw),
                _ => Value::Bytes(raw),
            };
            let pk = keys::unescape_bytes(&rest[sep_pos + 1..]);
            return Ok((value, String::from_utf8_lossy(&pk).into_owned()));
        }
        other => {
            return Err(crate::error::ThemisError::Internal(format!(
                "corrupt range index key: unknown discriminant {other}"
            )))
        }
    };
    // Fixed-width variants are followed by an explicit ':' separator before
    // the (escaped) primary key.
    let pk = keys::unescape_bytes(&rest[consumed + 1..]);
    Ok((value, String::from_utf8_lossy(&pk).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexCatalog, IndexDef, IndexKind};
    use crate::entity::Entity;
    use crate::kv::SledEngine;
    use crate::store::entity_store::{EntityStore, NullUndoSink};
    use std::sync::Arc;

    #[test]
    fn scan_returns_rows_in_ascending_value_order() {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        catalog.register(IndexDef {
            table: "users".into(),
            columns: vec!["age".into()],
            kind: IndexKind::Range,
            vector_dim: None,
        });
        let store = EntityStore::new(engine.clone(), catalog);
        for (pk, age) in [("u1", 30), ("u2", 10), ("u3", 20)] {
            let e = Entity::new("users", pk, 0).with_field("age", Value::I64(age));
            store.put(&e, &mut NullUndoSink).unwrap();
        }
        let rows = scan(engine.as_ref(), "users", "age", None, None).unwrap();
        let ages: Vec<i64> = rows
            .iter()
            .map(|(v, _)| match v {
                Value::I64(i) => *i,
                _ => panic!("expected i64"),
            })
            .collect();
        assert_eq!(ages, vec![10, 20, 30]);
    }

    #[test]
    fn scan_respects_bounds() {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        catalog.register(IndexDef {
            table: "users".into(),
            columns: vec!["age".into()],
            kind: IndexKind::Range,
            vector_dim: None,
        });
        let store = EntityStore::new(engine.clone(), catalog);
        for (pk, age) in [("u1", 30), ("u2", 10), ("u3", 20)] {
            let e = Entity::new("users", pk, 0).with_field("age", Value::I64(age));
            store.put(&e, &mut NullUndoSink).unwrap();
        }
        let lower = RangeBound { value: Value::I64(15), inclusive: true };
        let rows = scan(engine.as_ref(), "users", "age", Some(&lower), None).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
