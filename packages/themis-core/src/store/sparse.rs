//! Sparse index reads (spec §4.4): tracks only the primary keys of entities
//! where an optional column is *present*, so a sparse index on a rarely-set
//! field stays small regardless of table size.

use crate::error::Result;
use crate::keys;
use crate::kv::KvEngine;

pub fn present_keys(engine: &dyn KvEngine, table: &str, column: &str) -> Result<Vec<String>> {
    let prefix = keys::sparse_index_prefix(table, column);
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
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn only_entities_with_the_field_are_listed() {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        catalog.register(IndexDef {
            table: "users".into(),
            columns: vec!["nickname".into()],
            kind: IndexKind::Sparse,
            vector_dim: None,
        });
        let store = EntityStore::new(engine.clone(), catalog);
        let e1 = Entity::new("users", "u1", 0).with_field("nickname", Value::String("J".into()));
        let e2 = Entity::new("users", "u2", 0);
        store.put(&e1, &mut NullUndoSink).unwrap();
        store.put(&e2, &mut NullUndoSink).unwrap();

        let got = present_keys(engine.as_ref(), "users", "nickname").unwrap();
        assert_eq!(got, vec!["u1".to_string()]);
    }
}
