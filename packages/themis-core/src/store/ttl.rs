//! TTL sweeper (spec §4.4, §5): periodically deletes entities whose
//! `ttl_expiry_ms` has passed, driven by the `ttlidx:` range.

use crate::error::{Result, ThemisError};
use crate::keys;
use crate::store::entity_store::{EntityStore, UndoSink};

/// Deletes up to `limit` expired entities with `meta.ttl_expiry_ms <= now_ms`,
/// returning the `(table, pk)` pairs removed. Intended to be called
/// repeatedly by a background sweep loop (spec §5 resource model).
pub fn sweep_expired(
    store: &EntityStore,
    now_ms: i64,
    limit: usize,
    undo: &mut dyn UndoSink,
) -> Result<Vec<(String, String)>> {
    let upper = keys::ttl_index_upper_bound(now_ms);
    let rows = store.engine_ref().scan_range(keys::TTL_INDEX_PREFIX, &upper)?;
    let mut removed = Vec::new();
    for (key, _) in rows.into_iter().take(limit) {
        let (table, pk) = decode_ttl_key(&key)?;
        if store.delete(&table, &pk, undo)? {
            removed.push((table, pk));
        }
    }
    Ok(removed)
}

fn decode_ttl_key(key: &[u8]) -> Result<(String, String)> {
    let rest = &key[keys::TTL_INDEX_PREFIX.len()..];
    if rest.len() < 9 {
        return Err(ThemisError::Internal("corrupt ttl index key".into()));
    }
    let table_and_pk = &rest[9..]; // 8 bytes expiry + 1 separator
    let sep_pos = table_and_pk
        .iter()
        .position(|b| *b == b':')
        .ok_or_else(|| ThemisError::Internal("corrupt ttl index key: missing separator".into()))?;
    let table = keys::unescape_bytes(&table_and_pk[..sep_pos]);
    let pk = keys::unescape_bytes(&table_and_pk[sep_pos + 1..]);
    Ok((
        String::from_utf8_lossy(&table).into_owned(),
        String::from_utf8_lossy(&pk).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IndexCatalog;
    use crate::entity::Entity;
    use crate::kv::{KvEngine, SledEngine};
    use crate::store::entity_store::NullUndoSink;
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn sweep_removes_only_expired_entities() {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        let store = EntityStore::new(engine, catalog);

        let mut expiring = Entity::new("sessions", "s1", 0).with_field("x", Value::I64(1));
        expiring.meta.ttl_expiry_ms = Some(1_000);
        let mut fresh = Entity::new("sessions", "s2", 0).with_field("x", Value::I64(2));
        fresh.meta.ttl_expiry_ms = Some(5_000);

        store.put(&expiring, &mut NullUndoSink).unwrap();
        store.put(&fresh, &mut NullUndoSink).unwrap();

        let removed = sweep_expired(&store, 2_000, 10, &mut NullUndoSink).unwrap();
        assert_eq!(removed, vec![("sessions".to_string(), "s1".to_string())]);
        assert!(store.get("sessions", "s1").unwrap().is_none());
        assert!(store.get("sessions", "s2").unwrap().is_some());
    }
}
