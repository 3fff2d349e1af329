//! Equality index reads (spec §4.4): exact-match lookup returning primary
//! keys, for the executor's index-scan plan node.

use crate::error::Result;
use crate::keys;
use crate::kv::KvEngine;
use crate::value::Value;

pub fn lookup(engine: &dyn KvEngine, table: &str, column: &str, value: &Value) -> Result<Vec<String>> {
    let prefix = keys::equality_index_prefix(table, column, value);
    let rows = engine.scan_prefix(&prefix)?;
    rows.into_iter()
        .map(|(k, _)| pk_from_suffix(&k, &prefix))
        .collect::<Result<Vec<_>>>()
}

fn pk_from_suffix(key: &[u8], prefix: &[u8]) -> Result<String> {
    let suffix = &key[prefix.len()..];
    let unescaped = keys::unescape_bytes(suffix);
    Ok(String::from_utf8_lossy(&unescaped).into_owned())
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
    fn lookup_finds_all_matching_primary_keys() {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        catalog.register(IndexDef {
            table: "users".into(),
            columns: vec!["city".into()],
            kind: IndexKind::Equality,
            vector_dim: None,
        });
        let store = EntityStore::new(engine.clone(), catalog);
        for (pk, city) in [("u1", "Berlin"), ("u2", "Berlin"), ("u3", "Paris")] {
            let e = Entity::new("users", pk, 0).with_field("city", Value::String(city.into()));
            store.put(&e, &mut NullUndoSink).unwrap();
        }
        let mut got = lookup(engine.as_ref(), "users", "city", &Value::String("Berlin".into())).unwrap();
        got.sort();
        assert_eq!(got, vec!["u1".to_string(), "u2".to_string()]);
    }
}
