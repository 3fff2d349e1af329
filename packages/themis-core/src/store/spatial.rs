//! Spatial index (spec §4.4): a hand-rolled R-tree over axis-aligned
//! bounding boxes, persisted as a single serialized blob per `table.column`
//! the same way the vector index is (`crate::vector`) -- maintained
//! directly by the admin facade rather than through the per-write entity
//! diff pass, since geometry predicates are evaluated at query time, not as
//! an equality/range comparison.

use crate::error::{Result, ThemisError};
use crate::keys;
use crate::kv::KvEngine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn point(x: f64, y: f64) -> Self {
        Self { min_x: x, min_y: y, max_x: x, max_y: y }
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    fn union(&self, other: &BBox) -> BBox {
        BBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    fn area(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0) * (self.max_y - self.min_y).max(0.0)
    }

    fn enlargement(&self, other: &BBox) -> f64 {
        self.union(other).area() - self.area()
    }
}

const MAX_LEAF_ENTRIES: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Leaf {
    bbox: BBox,
    entries: Vec<(String, BBox)>,
}

/// A flat, single-level R-tree: fine for the index sizes this exercise
/// targets, and simpler to persist/rebuild than a multi-level tree. Leaves
/// split once they exceed `MAX_LEAF_ENTRIES`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RTree {
    leaves: Vec<Leaf>,
}

impl RTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.leaves.iter().map(|l| l.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, pk: &str, bbox: BBox) {
        self.remove(pk);
        let best = self
            .leaves
            .iter()
            .enumerate()
            .filter(|(_, l)| l.entries.len() < MAX_LEAF_ENTRIES)
            .min_by(|(_, a), (_, b)| {
                a.bbox
                    .enlargement(&bbox)
                    .partial_cmp(&b.bbox.enlargement(&bbox))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i);

        match best {
            Some(i) => {
                self.leaves[i].entries.push((pk.to_string(), bbox));
                self.leaves[i].bbox = self.leaves[i].bbox.union(&bbox);
            }
            None => {
                self.leaves.push(Leaf { bbox, entries: vec![(pk.to_string(), bbox)] });
            }
        }
    }

    pub fn remove(&mut self, pk: &str) {
        for leaf in &mut self.leaves {
            leaf.entries.retain(|(k, _)| k != pk);
        }
        self.leaves.retain(|l| !l.entries.is_empty());
        for leaf in &mut self.leaves {
            if let Some((_, first)) = leaf.entries.first() {
                leaf.bbox = leaf.entries[1..].iter().fold(*first, |acc, (_, b)| acc.union(b));
            }
        }
    }

    /// Primary keys whose bounding box intersects `query` (spec §4.4
    /// spatial predicate).
    pub fn query(&self, query: &BBox) -> Vec<String> {
        let mut out = Vec::new();
        for leaf in &self.leaves {
            if !leaf.bbox.intersects(query) {
                continue;
            }
            for (pk, bbox) in &leaf.entries {
                if bbox.intersects(query) {
                    out.push(pk.clone());
                }
            }
        }
        out
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ThemisError::Internal(format!("failed to encode rtree: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ThemisError::Internal(format!("corrupt rtree: {e}")))
    }
}

pub fn load(engine: &dyn KvEngine, table: &str, column: &str) -> Result<RTree> {
    match engine.get(&keys::rtree_root_meta_key(table, column))? {
        Some(bytes) => RTree::from_bytes(&bytes),
        None => Ok(RTree::new()),
    }
}

pub fn save(engine: &dyn KvEngine, table: &str, column: &str, tree: &RTree) -> Result<()> {
    engine.put(&keys::rtree_root_meta_key(table, column), &tree.to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_finds_intersecting_entries_only() {
        let mut tree = RTree::new();
        tree.insert("a", BBox::point(0.0, 0.0));
        tree.insert("b", BBox::point(10.0, 10.0));
        tree.insert("c", BBox { min_x: -1.0, min_y: -1.0, max_x: 1.0, max_y: 1.0 });

        let hits = tree.query(&BBox { min_x: -0.5, min_y: -0.5, max_x: 0.5, max_y: 0.5 });
        let mut hits = hits;
        hits.sort();
        assert_eq!(hits, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn remove_drops_entry_and_shrinks_bbox() {
        let mut tree = RTree::new();
        tree.insert("a", BBox::point(0.0, 0.0));
        tree.insert("b", BBox::point(5.0, 5.0));
        tree.remove("a");
        assert_eq!(tree.len(), 1);
        assert!(tree.query(&BBox::point(0.0, 0.0)).is_empty());
    }

    #[test]
    fn leaves_split_once_max_entries_exceeded() {
        let mut tree = RTree::new();
        for i in 0..(MAX_LEAF_ENTRIES + 2) {
            tree.insert(&format!("p{i}"), BBox::point(i as f64, i as f64));
        }
        assert!(tree.leaves.len() >= 2);
    }
}
