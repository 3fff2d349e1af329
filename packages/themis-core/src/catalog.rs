//! Index catalog (spec §4.4, §4.14 "index catalog snapshot"): tracks which
//! secondary indexes exist on which table/column so the entity store knows
//! what to maintain on every write. Held behind an `ArcSwap` so readers never
//! block a concurrent `CREATE INDEX` (mirrors the teacher's lock-free
//! copy-on-write buffer pattern for hot, rarely-mutated state).

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexKind {
    Equality,
    Range,
    Composite,
    Sparse,
    Fulltext,
    Spatial,
    Vector,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Equality => "equality",
            IndexKind::Range => "range",
            IndexKind::Composite => "composite",
            IndexKind::Sparse => "sparse",
            IndexKind::Fulltext => "fulltext",
            IndexKind::Spatial => "spatial",
            IndexKind::Vector => "vector",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub table: String,
    /// Single column for equality/range/sparse/fulltext/spatial/vector;
    /// multiple columns (in order) for composite.
    pub columns: Vec<String>,
    pub kind: IndexKind,
    /// Vector-index-only: embedding dimensionality, enforced on insert.
    pub vector_dim: Option<u32>,
}

impl IndexDef {
    fn key(&self) -> (String, Vec<String>, IndexKind) {
        (self.table.clone(), self.columns.clone(), self.kind)
    }
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    indexes: BTreeMap<(String, Vec<String>, IndexKind), IndexDef>,
}

/// Lock-free, copy-on-write registry of index definitions.
pub struct IndexCatalog {
    state: ArcSwap<CatalogState>,
}

impl Default for IndexCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexCatalog {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(CatalogState::default()),
        }
    }

    pub fn register(&self, def: IndexDef) {
        let key = def.key();
        let current = self.state.load();
        let mut next = (**current).clone();
        next.indexes.insert(key, def);
        self.state.store(Arc::new(next));
    }

    pub fn remove(&self, table: &str, columns: &[String], kind: IndexKind) -> bool {
        let key = (table.to_string(), columns.to_vec(), kind);
        let current = self.state.load();
        if !current.indexes.contains_key(&key) {
            return false;
        }
        let mut next = (**current).clone();
        next.indexes.remove(&key);
        self.state.store(Arc::new(next));
        true
    }

    pub fn get(&self, table: &str, columns: &[String], kind: IndexKind) -> Option<IndexDef> {
        self.state
            .load()
            .indexes
            .get(&(table.to_string(), columns.to_vec(), kind))
            .cloned()
    }

    /// All index definitions touching `table`, in a stable order -- the
    /// entity store walks this list on every put/delete to keep indexes
    /// in sync with the base row.
    pub fn indexes_for_table(&self, table: &str) -> Vec<IndexDef> {
        self.state
            .load()
            .indexes
            .values()
            .filter(|d| d.table == table)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<IndexDef> {
        self.state.load().indexes.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_round_trips() {
        let cat = IndexCatalog::new();
        cat.register(IndexDef {
            table: "users".into(),
            columns: vec!["city".into()],
            kind: IndexKind::Equality,
            vector_dim: None,
        });
        assert!(cat
            .get("users", &["city".to_string()], IndexKind::Equality)
            .is_some());
        assert_eq!(cat.indexes_for_table("users").len(), 1);
    }

    #[test]
    fn remove_drops_only_the_matching_definition() {
        let cat = IndexCatalog::new();
        let def = IndexDef {
            table: "users".into(),
            columns: vec!["age".into()],
            kind: IndexKind::Range,
            vector_dim: None,
        };
        cat.register(def);
        assert!(cat.remove("users", &["age".to_string()], IndexKind::Range));
        assert!(!cat.remove("users", &["age".to_string()], IndexKind::Range));
        assert!(cat.indexes_for_table("users").is_empty());
    }
}
