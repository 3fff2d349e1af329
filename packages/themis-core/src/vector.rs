//! HNSW vector index (spec §4.6): hand-rolled rather than a crate dependency
//! so tombstoning, prefiltered search and persistence format are fully under
//! our control. The whole graph for one `table.column` is kept as a single
//! serialized blob under `vec:{table}:{column}:meta` -- vector indexes are
//! expected to fit comfortably in memory, so there is no per-node KV row.

use crate::error::{Result, ThemisError};
use crate::keys;
use crate::kv::KvEngine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    pk: String,
    vector: Vec<f32>,
    level: usize,
    /// `neighbors[l]` is the adjacency list at layer `l`, `l <= level`.
    neighbors: Vec<Vec<usize>>,
    tombstoned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    pub dim: u32,
    pub m: usize,
    pub ef_construction: usize,
    entry_point: Option<usize>,
    max_level: usize,
    nodes: Vec<HnswNode>,
    pk_to_id: HashMap<String, usize>,
    tombstone_count: usize,
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        1.0
    } else {
        1.0 - (dot / (na * nb))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredId {
    id: usize,
    dist: f32,
}
impl Eq for ScoredId {}
impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(Ordering::Equal)
    }
}

impl HnswIndex {
    pub fn new(dim: u32, m: usize, ef_construction: usize) -> Self {
        Self {
            dim,
            m,
            ef_construction,
            entry_point: None,
            max_level: 0,
            nodes: Vec::new(),
            pk_to_id: HashMap::new(),
            tombstone_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pk_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pk_to_id.is_empty()
    }

    pub fn tombstone_fraction(&self) -> f64 {
        if self.nodes.is_empty() {
            0.0
        } else {
            self.tombstone_count as f64 / self.nodes.len() as f64
        }
    }

    fn random_level(&self) -> usize {
        // Standard HNSW level assignment: P(level >= l) = (1/M)^l.
        let mut level = 0;
        let mut rng = rand::thread_rng();
        while rng.gen::<f64>() < (1.0 / self.m.max(2) as f64) && level < 32 {
            level += 1;
        }
        level
    }

    /// Inserts or replaces the vector stored for `pk`. Dimension mismatches
    /// are a caller error (spec §7 `VectorDimensionMismatch`).
    pub fn insert(&mut self, pk: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() as u32 != self.dim {
            return Err(ThemisError::VectorDimensionMismatch {
                table: String::new(),
                column: String::new(),
                expected: self.dim,
                got: vector.len() as u32,
            });
        }
        if let Some(&existing) = self.pk_to_id.get(pk) {
            self.remove_by_id(existing);
        }

        let level = self.random_level();
        let id = self.nodes.len();
        self.nodes.push(HnswNode {
            pk: pk.to_string(),
            vector: vector.clone(),
            level,
            neighbors: vec![Vec::new(); level + 1],
            tombstoned: false,
        });
        self.pk_to_id.insert(pk.to_string(), id);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return Ok(());
        };

        let mut current = entry;
        for layer in (level + 1..=self.max_level).rev() {
            current = self.greedy_closest(&vector, current, layer);
        }
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(&vector, current, self.ef_construction, layer);
            let neighbors = self.select_neighbors(&candidates, self.m);
            for &n in &neighbors {
                self.connect(id, n, layer);
                self.connect(n, id, layer);
            }
            if let Some(&best) = candidates.first() {
                current = best.id;
            }
        }
        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
        Ok(())
    }

    fn connect(&mut self, from: usize, to: usize, layer: usize) {
        if self.nodes[from].neighbors.len() <= layer {
            return;
        }
        if self.nodes[from].neighbors[layer].contains(&to) {
            return;
        }
        self.nodes[from].neighbors[layer].push(to);
        if self.nodes[from].neighbors[layer].len() > self.m * 2 {
            let vector = self.nodes[from].vector.clone();
            let list = &self.nodes[from].neighbors[layer];
            let mut scored: Vec<ScoredId> = list
                .iter()
                .map(|&id| ScoredId { id, dist: cosine_distance(&vector, &self.nodes[id].vector) })
                .collect();
            scored.sort();
            scored.truncate(self.m * 2);
            let new_list: Vec<usize> = scored.into_iter().map(|s| s.id).collect();
            self.nodes[from].neighbors[layer] = new_list;
        }
    }

    fn greedy_closest(&self, query: &[f32], start: usize, layer: usize) -> usize {
        let mut current = start;
        let mut current_dist = cosine_distance(query, &self.nodes[current].vector);
        loop {
            let mut improved = false;
            if layer < self.nodes[current].neighbors.len() {
                for &n in &self.nodes[current].neighbors[layer] {
                    if self.nodes[n].tombstoned {
                        continue;
                    }
                    let d = cosine_distance(query, &self.nodes[n].vector);
                    if d < current_dist {
                        current_dist = d;
                        current = n;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first search at a single layer, returning up to `ef` candidates
    /// sorted by ascending distance.
    fn search_layer(&self, query: &[f32], start: usize, ef: usize, layer: usize) -> Vec<ScoredId> {
        let mut visited = HashSet::new();
        visited.insert(start);
        let start_dist = cosine_distance(query, &self.nodes[start].vector);
        let mut candidates = BinaryHeap::new();
        candidates.push(std::cmp::Reverse(ScoredId { id: start, dist: start_dist }));
        let mut results = vec![ScoredId { id: start, dist: start_dist }];

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            let worst = results
                .iter()
                .cloned()
                .fold(f32::MIN, |acc, s| acc.max(s.dist));
            if current.dist > worst && results.len() >= ef {
                break;
            }
            if layer >= self.nodes[current.id].neighbors.len() {
                continue;
            }
            for &n in &self.nodes[current.id].neighbors[layer] {
                if !visited.insert(n) {
                    continue;
                }
                if self.nodes[n].tombstoned {
                    continue;
                }
                let d = cosine_distance(query, &self.nodes[n].vector);
                candidates.push(std::cmp::Reverse(ScoredId { id: n, dist: d }));
                results.push(ScoredId { id: n, dist: d });
            }
        }
        results.sort();
        results.truncate(ef.max(1));
        results
    }

    fn select_neighbors(&self, candidates: &[ScoredId], m: usize) -> Vec<usize> {
        candidates.iter().take(m).map(|c| c.id).collect()
    }

    fn remove_by_id(&mut self, id: usize) {
        if !self.nodes[id].tombstoned {
            self.nodes[id].tombstoned = true;
            self.tombstone_count += 1;
        }
    }

    /// Marks `pk`'s vector as deleted. The node stays in the graph (so
    /// existing adjacency remains navigable) until `rebuild` runs.
    pub fn remove(&mut self, pk: &str) {
        if let Some(&id) = self.pk_to_id.get(pk) {
            self.remove_by_id(id);
            self.pk_to_id.remove(pk);
        }
    }

    /// Approximate k-nearest-neighbor search.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(String, f32)> {
        self.search_prefiltered(query, k, ef_search, None)
    }

    /// Same as [`Self::search`], but candidates outside `allowed` (when
    /// given) are skipped during the graph walk, not just filtered out of
    /// the final list -- so a highly selective prefilter still overfetches
    /// along real graph edges instead of starving the result set (spec §4.6
    /// "prefiltered search").
    pub fn search_prefiltered(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        allowed: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        let mut current = entry;
        for layer in (1..=self.max_level).rev() {
            current = self.greedy_closest(query, current, layer);
        }
        let candidates = self.search_layer(query, current, ef_search.max(k), 0);
        let mut out: Vec<(String, f32)> = candidates
            .into_iter()
            .filter(|c| !self.nodes[c.id].tombstoned)
            .filter(|c| allowed.map(|set| set.contains(&self.nodes[c.id].pk)).unwrap_or(true))
            .map(|c| (self.nodes[c.id].pk.clone(), c.dist))
            .collect();
        out.truncate(k);
        out
    }

    /// Rebuilds the graph from scratch over the live (non-tombstoned)
    /// vectors, discarding dead adjacency. Triggered once tombstones exceed
    /// `EngineConfig::hnsw_tombstone_rebuild_threshold`.
    pub fn rebuild(&self) -> Self {
        let mut fresh = HnswIndex::new(self.dim, self.m, self.ef_construction);
        for node in &self.nodes {
            if !node.tombstoned {
                let _ = fresh.insert(&node.pk, node.vector.clone());
            }
        }
        fresh
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ThemisError::Internal(format!("failed to encode hnsw index: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ThemisError::Internal(format!("corrupt hnsw index: {e}")))
    }
}

pub fn load(engine: &dyn KvEngine, table: &str, column: &str) -> Result<Option<HnswIndex>> {
    match engine.get(&keys::vector_meta_key(table, column))? {
        Some(bytes) => Ok(Some(HnswIndex::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

pub fn save(engine: &dyn KvEngine, table: &str, column: &str, index: &HnswIndex) -> Result<()> {
    engine.put(&keys::vector_meta_key(table, column), &index.to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_finds_nearest_neighbor_by_cosine_distance() {
        let mut idx = HnswIndex::new(2, 8, 32);
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("b", vec![0.0, 1.0]).unwrap();
        idx.insert("c", vec![0.9, 0.1]).unwrap();

        let results = idx.search(&[1.0, 0.0], 1, 32);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = HnswIndex::new(3, 8, 32);
        let err = idx.insert("a", vec![1.0, 0.0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SchemaViolation);
    }

    #[test]
    fn removed_vectors_are_excluded_from_search_results() {
        let mut idx = HnswIndex::new(2, 8, 32);
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("b", vec![0.0, 1.0]).unwrap();
        idx.remove("a");

        let results = idx.search(&[1.0, 0.0], 2, 32);
        assert!(results.iter().all(|(pk, _)| pk != "a"));
        assert!(idx.tombstone_fraction() > 0.0);
    }

    #[test]
    fn prefiltered_search_only_returns_allowed_pks() {
        let mut idx = HnswIndex::new(2, 8, 32);
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("b", vec![0.9, 0.1]).unwrap();
        idx.insert("c", vec![0.0, 1.0]).unwrap();

        let allowed: HashSet<String> = ["c".to_string()].into_iter().collect();
        let results = idx.search_prefiltered(&[1.0, 0.0], 2, 32, Some(&allowed));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "c");
    }

    #[test]
    fn rebuild_drops_tombstoned_nodes() {
        let mut idx = HnswIndex::new(2, 8, 32);
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("b", vec![0.0, 1.0]).unwrap();
        idx.remove("a");
        let rebuilt = idx.rebuild();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt.tombstone_fraction(), 0.0);
    }
}
