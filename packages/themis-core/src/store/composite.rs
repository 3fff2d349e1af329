//! Composite index reads (spec §4.4): exact-match lookup over an ordered
//! tuple of columns, used for multi-column equality predicates.

use crate::error::Result;
use crate::keys;
use crate::kv::KvEngine;
use crate::value::Value;

pub fn lookup(
    engine: &dyn KvEngine,
    table: &str,
    columns: &[String],
    values: &[Value],
) -> Result<Vec<String>> {
    let prefix = keys::composite_index_prefix(table, columns, values);
    let rows = engine.scan_prefix(&prefix)?;
    Ok(rows
        .into_iter()
        .map(|(k, _)| {
            let unescaped = keys::unescape_bytes(&k[prefix.len()..]);
            String::from_utf8_lossy(&unescaped).into_owned()
        })
        .collect())
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
    fn lookup_matches_exact_tuple_only() {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        let columns = vec!["country".to_string(), "city".to_string()];
        catalog.register(IndexDef {
            table: "users".into(),
            columns: columns.clone(),
            kind: IndexKind::Composite,
            vector_dim: None,
        });
        let store = EntityStore::new(engine.clone(), catalog);
        let e1 = Entity::new("users", "u1", 0)
            .with_field("country", Value::String("DE".into()))
            .with_field("city", Value::String("Berlin".into()));
        let e2 = Entity::new("users", "u2", 0)
            .with_field("country", Value::String("FR".into()))
            .with_field("city", Value::String("Berlin".into()));
        store.put(&e1, &mut NullUndoSink).unwrap();
        store.put(&e2, &mut NullUndoSink).unwrap();

        let values = vec![Value::String("DE".into()), Value::String("Berlin".into())];
        let got = lookup(engine.as_ref(), "users", &columns, &values).unwrap();
        assert_eq!(got, vec!["u1".to_string()]);
    }
}
