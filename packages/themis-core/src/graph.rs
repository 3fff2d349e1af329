//! Graph index (spec §4.5): adjacency maintained as ordinary KV rows keyed
//! by `graph:out:`/`graph:in:`, plus BFS/DFS/bidirectional-shortest-path
//! traversal over it. Edges are entities carrying `_from`/`_to` (see
//! `crate::entity::Entity::is_edge`); this module only maintains and walks
//! the adjacency rows, it never owns edge data itself.

use crate::entity::Entity;
use crate::error::Result;
use crate::keys;
use crate::kv::{KvEngine, WriteOp};
use crate::store::entity_store::UndoSink;
use std::collections::{HashSet, VecDeque};

/// Direction to traverse an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
    Any,
}

/// Adds or removes the `graph:out:`/`graph:in:` rows for an edge entity.
/// Called whenever an entity that `is_edge()` is put or deleted.
pub fn diff_edge(
    prior: Option<&Entity>,
    next: Option<&Entity>,
    ops: &mut Vec<WriteOp>,
    undo: &mut dyn UndoSink,
) {
    if let Some(e) = prior.filter(|e| e.is_edge()) {
        if let (Some(from), Some(to)) = (e.edge_from(), e.edge_to()) {
            let out_key = keys::graph_out_key(from, &e.pk);
            undo.record(out_key.clone(), Some(Vec::new()));
            ops.push(WriteOp::Delete(out_key));
            let in_key = keys::graph_in_key(to, &e.pk);
            undo.record(in_key.clone(), Some(Vec::new()));
            ops.push(WriteOp::Delete(in_key));
        }
    }
    if let Some(e) = next.filter(|e| e.is_edge()) {
        if let (Some(from), Some(to)) = (e.edge_from(), e.edge_to()) {
            let out_key = keys::graph_out_key(from, &e.pk);
            undo.record(out_key.clone(), None);
            ops.push(WriteOp::Put(out_key, to.as_bytes().to_vec()));
            let in_key = keys::graph_in_key(to, &e.pk);
            undo.record(in_key.clone(), None);
            ops.push(WriteOp::Put(in_key, from.as_bytes().to_vec()));
        }
    }
}

/// The edge ids and opposite-endpoint vertex reachable directly from `pk`.
pub fn neighbors(engine: &dyn KvEngine, pk: &str, direction: Direction) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    if matches!(direction, Direction::Outbound | Direction::Any) {
        let prefix = keys::graph_out_prefix(pk);
        for (k, v) in engine.scan_prefix(&prefix)? {
            let edge_id = String::from_utf8_lossy(&keys::unescape_bytes(&k[prefix.len()..])).into_owned();
            let to = String::from_utf8_lossy(&v).into_owned();
            out.push((edge_id, to));
        }
    }
    if matches!(direction, Direction::Inbound | Direction::Any) {
        let prefix = keys::graph_in_prefix(pk);
        for (k, v) in engine.scan_prefix(&prefix)? {
            let edge_id = String::from_utf8_lossy(&keys::unescape_bytes(&k[prefix.len()..])).into_owned();
            let from = String::from_utf8_lossy(&v).into_owned();
            out.push((edge_id, from));
        }
    }
    Ok(out)
}

/// Breadth-first traversal up to `max_depth` hops, visiting each vertex at
/// most once. `max_branching` caps how many neighbors are expanded per
/// vertex, so a query against a hub vertex degrades by sampling rather than
/// exploding (spec §4.5 "Graph+Geo branching-factor sampling/abort").
pub fn bfs(
    engine: &dyn KvEngine,
    start: &str,
    direction: Direction,
    max_depth: u32,
    max_branching: usize,
) -> Result<Vec<(String, u32)>> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start.to_string());
    queue.push_back((start.to_string(), 0u32));
    let mut order = Vec::new();

    while let Some((vertex, depth)) = queue.pop_front() {
        order.push((vertex.clone(), depth));
        if depth >= max_depth {
            continue;
        }
        let mut neighbors = neighbors(engine, &vertex, direction)?;
        neighbors.truncate(max_branching);
        for (_, other) in neighbors {
            if visited.insert(other.clone()) {
                queue.push_back((other, depth + 1));
            }
        }
    }
    Ok(order)
}

/// Depth-first traversal, same visitation and branching-cap semantics as
/// [`bfs`] but exploring a single path to `max_depth` before backtracking.
pub fn dfs(
    engine: &dyn KvEngine,
    start: &str,
    direction: Direction,
    max_depth: u32,
    max_branching: usize,
) -> Result<Vec<(String, u32)>> {
    let mut visited = HashSet::new();
    let mut stack = vec![(start.to_string(), 0u32)];
    visited.insert(start.to_string());
    let mut order = Vec::new();

    while let Some((vertex, depth)) = stack.pop() {
        order.push((vertex.clone(), depth));
        if depth >= max_depth {
            continue;
        }
        let mut neighbors = neighbors(engine, &vertex, direction)?;
        neighbors.truncate(max_branching);
        for (_, other) in neighbors.into_iter().rev() {
            if visited.insert(other.clone()) {
                stack.push((other, depth + 1));
            }
        }
    }
    Ok(order)
}

/// Bidirectional BFS shortest path between `from` and `to` (spec §4.5):
/// expands frontiers from both ends and stops at the first meeting point,
/// which is optimal for unweighted edges and roughly halves the explored
/// set compared to a one-sided search.
pub fn shortest_path(
    engine: &dyn KvEngine,
    from: &str,
    to: &str,
    max_depth: u32,
    max_branching: usize,
) -> Result<Option<Vec<String>>> {
    if from == to {
        return Ok(Some(vec![from.to_string()]));
    }

    let mut forward_parent = std::collections::HashMap::new();
    let mut backward_parent = std::collections::HashMap::new();
    forward_parent.insert(from.to_string(), None::<String>);
    backward_parent.insert(to.to_string(), None::<String>);
    let mut forward_frontier = vec![from.to_string()];
    let mut backward_frontier = vec![to.to_string()];

    for _ in 0..max_depth {
        if forward_frontier.is_empty() || backward_frontier.is_empty() {
            break;
        }
        let mut next_forward = Vec::new();
        for v in &forward_frontier {
            let mut neighbors = neighbors(engine, v, Direction::Outbound)?;
            neighbors.truncate(max_branching);
            for (_, other) in neighbors {
                if let std::collections::hash_map::Entry::Vacant(e) = forward_parent.entry(other.clone()) {
                    e.insert(Some(v.clone()));
                    next_forward.push(other.clone());
                }
                if backward_parent.contains_key(&other) {
                    return Ok(Some(reconstruct(&forward_parent, &backward_parent, &other)));
                }
            }
        }
        forward_frontier = next_forward;

        let mut next_backward = Vec::new();
        for v in &backward_frontier {
            let mut neighbors = neighbors(engine, v, Direction::Inbound)?;
            neighbors.truncate(max_branching);
            for (_, other) in neighbors {
                if let std::collections::hash_map::Entry::Vacant(e) = backward_parent.entry(other.clone()) {
                    e.insert(Some(v.clone()));
                    next_backward.push(other.clone());
                }
                if forward_parent.contains_key(&other) {
                    return Ok(Some(reconstruct(&forward_parent, &backward_parent, &other)));
                }
            }
        }
        backward_frontier = next_backward;
    }
    Ok(None)
}

fn reconstruct(
    forward_parent: &std::collections::HashMap<String, Option<String>>,
    backward_parent: &std::collections::HashMap<String, Option<String>>,
    meeting: &str,
) -> Vec<String> {
    let mut front = Vec::new();
    let mut cur = Some(meeting.to_string());
    while let Some(v) = cur {
        front.push(v.clone());
        cur = forward_parent.get(&v).cloned().flatten();
    }
    front.reverse();

    let mut back = Vec::new();
    let mut cur = backward_parent.get(meeting).cloned().flatten();
    while let Some(v) = cur {
        back.push(v.clone());
        cur = backward_parent.get(&v).cloned().flatten();
    }

    front.extend(back);
    front
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::SledEngine;
    use crate::store::entity_store::NullUndoSink;
    use crate::value::Value;

    fn edge(id: &str, from: &str, to: &str) -> Entity {
        Entity::new("edges", id, 0)
            .with_field("_from", Value::String(from.into()))
            .with_field("_to", Value::String(to.into()))
    }

    fn put_edge(engine: &dyn KvEngine, e: &Entity) {
        let mut ops = Vec::new();
        diff_edge(None, Some(e), &mut ops, &mut NullUndoSink);
        engine.write_batch(ops).unwrap();
    }

    #[test]
    fn bfs_visits_each_vertex_once_within_depth() {
        let engine = SledEngine::open_temp().unwrap();
        put_edge(&engine, &edge("e1", "a", "b"));
        put_edge(&engine, &edge("e2", "b", "c"));
        put_edge(&engine, &edge("e3", "a", "c"));

        let order = bfs(&engine, "a", Direction::Outbound, 2, 10).unwrap();
        let visited: HashSet<_> = order.iter().map(|(v, _)| v.clone()).collect();
        assert_eq!(visited, HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()]));
    }

    #[test]
    fn shortest_path_finds_minimal_hop_route() {
        let engine = SledEngine::open_temp().unwrap();
        put_edge(&engine, &edge("e1", "a", "b"));
        put_edge(&engine, &edge("e2", "b", "c"));
        put_edge(&engine, &edge("e3", "c", "d"));
        put_edge(&engine, &edge("e4", "a", "d"));

        let path = shortest_path(&engine, "a", "d", 5, 10).unwrap().unwrap();
        assert_eq!(path, vec!["a".to_string(), "d".to_string()]);
    }

    #[test]
    fn shortest_path_returns_none_when_unreachable() {
        let engine = SledEngine::open_temp().unwrap();
        put_edge(&engine, &edge("e1", "a", "b"));
        assert!(shortest_path(&engine, "a", "z", 5, 10).unwrap().is_none());
    }
}
