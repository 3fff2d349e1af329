//! Pull-based plan executor (spec §4.11): walks a translated `PlanNode`
//! tree and produces rows, materializing `WITH` CTEs into the query's
//! `CteCache` before the main body runs.
//!
//! Row correlation (joins, correlated subqueries, graph traversal steps
//! that reference an outer `FOR` variable) is handled uniformly by
//! threading a `base` row through every node: a node's output rows always
//! start as a clone of `base` with its own bindings added on top.

use crate::ast::{AggFunc, CollectClause, Direction as AstDirection, Expr, Query, SortKey};
use crate::cte_cache::CteCache;
use crate::eval::{self, EvalHost, Row};
use crate::optimizer;
use crate::plan::{Bound, PlanNode};
use std::collections::HashMap;
use themis_core::catalog::IndexCatalog;
use themis_core::entity::Entity;
use themis_core::error::{Result, ThemisError};
use themis_core::kv::KvEngine;
use themis_core::value::Value;

/// Key under which `Project` (i.e. `RETURN`) stashes its output value.
/// Not a legal AQL identifier, so it can't collide with a bound variable.
pub const RETURN_KEY: &str = "@return";

const MAX_BRANCHING: usize = 256;
const MAX_SHORTEST_PATH_DEPTH: u32 = 50;

/// Entity lookups the executor needs, abstracted so the admin facade can
/// route reads through an active transaction instead of straight to the
/// entity store when one is open.
pub trait EntityReader: Send + Sync {
    fn get_entity(&self, table: &str, pk: &str) -> Result<Option<Entity>>;
}

impl EntityReader for themis_core::store::EntityStore {
    fn get_entity(&self, table: &str, pk: &str) -> Result<Option<Entity>> {
        self.get(table, pk)
    }
}

pub struct QueryContext<'a> {
    pub engine: &'a dyn KvEngine,
    pub reader: &'a dyn EntityReader,
    pub catalog: &'a IndexCatalog,
    pub bind_vars: HashMap<String, Value>,
    pub cte_cache: CteCache,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        engine: &'a dyn KvEngine,
        reader: &'a dyn EntityReader,
        catalog: &'a IndexCatalog,
        bind_vars: HashMap<String, Value>,
        cte_cache: CteCache,
    ) -> Self {
        Self { engine, reader, catalog, bind_vars, cte_cache }
    }
}

struct Host<'ctx, 'a> {
    ctx: &'ctx mut QueryContext<'a>,
}

impl EvalHost for Host<'_, '_> {
    fn bind_var(&self, name: &str) -> Option<Value> {
        self.ctx.bind_vars.get(name).cloned()
    }

    fn run_scalar_subquery(&mut self, query: &Query, outer: &Row) -> Result<Value> {
        let rows = execute_correlated(query, self.ctx, outer)?;
        Ok(rows.into_iter().next().unwrap_or(Value::Null))
    }

    fn run_array_subquery(&mut self, query: &Query, outer: &Row) -> Result<Vec<Value>> {
        execute_correlated(query, self.ctx, outer)
    }
}

fn eval_with_ctx(expr: &Expr, row: &Row, ctx: &mut QueryContext) -> Result<Value> {
    let mut host = Host { ctx };
    eval::eval(expr, row, &mut host)
}

/// Runs a complete query (translating, materializing CTEs, executing the
/// body) and returns the `RETURN`ed values.
pub fn execute(query: &Query, ctx: &mut QueryContext) -> Result<Vec<Value>> {
    execute_correlated(query, ctx, &Row::new())
}

fn execute_correlated(query: &Query, ctx: &mut QueryContext, outer: &Row) -> Result<Vec<Value>> {
    let translated = optimizer::translate(query, ctx.catalog);
    for (name, node) in &translated.ctes {
        let rows = exec_rows(node, ctx, outer)?;
        ctx.cte_cache.put(name, extract_return(rows))?;
    }
    let rows = exec_rows(&translated.body, ctx, outer)?;
    Ok(extract_return(rows))
}

fn extract_return(rows: Vec<Row>) -> Vec<Value> {
    rows.into_iter().map(|mut r| r.remove(RETURN_KEY).unwrap_or(Value::Null)).collect()
}

fn entity_to_value(e: &Entity) -> Value {
    let mut fields = e.fields.clone();
    fields.entry("_key".to_string()).or_insert_with(|| Value::String(e.pk.clone()));
    fields.entry("_id".to_string()).or_insert_with(|| Value::String(format!("{}/{}", e.table, e.pk)));
    Value::Object(fields)
}

fn doc_id_to_value(id: &str, ctx: &mut QueryContext) -> Result<Value> {
    match id.split_once('/') {
        Some((table, pk)) => match ctx.reader.get_entity(table, pk)? {
            Some(entity) => Ok(entity_to_value(&entity)),
            None => Ok(Value::String(id.to_string())),
        },
        None => Ok(Value::String(id.to_string())),
    }
}

fn bind_pks(var: &str, table: &str, pks: &[String], ctx: &mut QueryContext, base: &Row) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(pks.len());
    for pk in pks {
        if let Some(entity) = ctx.reader.get_entity(table, pk)? {
            let mut row = base.clone();
            row.insert(var.to_string(), entity_to_value(&entity));
            out.push(row);
        }
    }
    Ok(out)
}

fn to_range_bound(b: &Bound) -> themis_core::store::range::RangeBound {
    match b {
        Bound::Inclusive(v) => themis_core::store::range::RangeBound { value: v.clone(), inclusive: true },
        Bound::Exclusive(v) => themis_core::store::range::RangeBound { value: v.clone(), inclusive: false },
    }
}

fn exec_rows(node: &PlanNode, ctx: &mut QueryContext, base: &Row) -> Result<Vec<Row>> {
    match node {
        PlanNode::Scan { var, table } => {
            let prefix = themis_core::keys::entity_prefix(table);
            let raw = ctx.engine.scan_prefix(&prefix)?;
            let mut out = Vec::with_capacity(raw.len());
            for (_, bytes) in raw {
                let entity = Entity::from_canonical_bytes(&bytes)
                    .map_err(|e| ThemisError::Internal(format!("corrupt entity row: {e}")))?;
                let mut row = base.clone();
                row.insert(var.clone(), entity_to_value(&entity));
                out.push(row);
            }
            Ok(out)
        }
        PlanNode::IndexScan { var, table, column, value } => {
            let pks = themis_core::store::equality::lookup(ctx.engine, table, column, value)?;
            bind_pks(var, table, &pks, ctx, base)
        }
        PlanNode::RangeScan { var, table, column, lower, upper } => {
            let lower = lower.as_ref().map(to_range_bound);
            let upper = upper.as_ref().map(to_range_bound);
            let rows = themis_core::store::range::scan(ctx.engine, table, column, lower.as_ref(), upper.as_ref())?;
            let mut out = Vec::with_capacity(rows.len());
            for (_, pk) in rows {
                if let Some(entity) = ctx.reader.get_entity(table, &pk)? {
                    let mut row = base.clone();
                    row.insert(var.clone(), entity_to_value(&entity));
                    out.push(row);
                }
            }
            Ok(out)
        }
        PlanNode::CompositeScan { var, table, columns, values } => {
            let pks = themis_core::store::composite::lookup(ctx.engine, table, columns, values)?;
            bind_pks(var, table, &pks, ctx, base)
        }
        PlanNode::FulltextScan { var, table, column, query, limit } => {
            let ranked = themis_core::store::fulltext::search(ctx.engine, table, column, query, *limit, 1.2, 0.75)?;
            let mut out = Vec::with_capacity(ranked.len());
            for (pk, score) in ranked {
                if let Some(entity) = ctx.reader.get_entity(table, &pk)? {
                    let mut row = base.clone();
                    row.insert(var.clone(), entity_to_value(&entity));
                    row.insert("_score".to_string(), Value::F64(score));
                    out.push(row);
                }
            }
            Ok(out)
        }
        PlanNode::VectorKnn { var, table, column, query, k, ef } => {
            let Some(index) = themis_core::vector::load(ctx.engine, table, column)? else {
                return Ok(Vec::new());
            };
            let mut out = Vec::new();
            for (pk, distance) in index.search(query, *k, *ef) {
                if let Some(entity) = ctx.reader.get_entity(table, &pk)? {
                    let mut row = base.clone();
                    row.insert(var.clone(), entity_to_value(&entity));
                    row.insert("_score".to_string(), Value::F64(1.0 - distance as f64));
                    out.push(row);
                }
            }
            Ok(out)
        }
        PlanNode::Traversal { vertex_var, edge_var, direction, start, min_depth, max_depth } => {
            exec_traversal(vertex_var, edge_var.as_deref(), *direction, start, *min_depth, *max_depth, ctx, base)
        }
        PlanNode::ShortestPath { vertex_var, edge_var, direction: _, start, target } => {
            exec_shortest_path(vertex_var, edge_var.as_deref(), start, target, ctx, base)
        }
        PlanNode::ForExpr { var, source } => {
            let value = eval_with_ctx(source, base, ctx)?;
            let items = match value {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            Ok(items
                .into_iter()
                .map(|v| {
                    let mut row = base.clone();
                    row.insert(var.clone(), v);
                    row
                })
                .collect())
        }
        PlanNode::NestedLoopJoin(l, r) => {
            let left_rows = exec_rows(l, ctx, base)?;
            let mut out = Vec::new();
            for left_row in left_rows {
                out.extend(exec_rows(r, ctx, &left_row)?);
            }
            Ok(out)
        }
        PlanNode::HashJoin { left, right, left_key, right_key } => {
            let left_rows = exec_rows(left, ctx, base)?;
            let mut buckets: HashMap<Vec<u8>, Vec<Row>> = HashMap::new();
            for row in &left_rows {
                let key = eval_with_ctx(left_key, row, ctx)?.canonical_bytes();
                buckets.entry(key).or_default().push(row.clone());
            }
            let right_rows = exec_rows(right, ctx, base)?;
            let mut out = Vec::new();
            for right_row in right_rows {
                let key = eval_with_ctx(right_key, &right_row, ctx)?.canonical_bytes();
                if let Some(matches) = buckets.get(&key) {
                    for left_row in matches {
                        let mut merged = left_row.clone();
                        for (k, v) in &right_row {
                            merged.insert(k.clone(), v.clone());
                        }
                        out.push(merged);
                    }
                }
            }
            Ok(out)
        }
        PlanNode::Filter(input, expr) => {
            let rows = exec_rows(input, ctx, base)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if eval::is_truthy(&eval_with_ctx(expr, &row, ctx)?) {
                    out.push(row);
                }
            }
            Ok(out)
        }
        PlanNode::LetBinding(input, var, expr) => {
            let rows = exec_rows(input, ctx, base)?;
            let mut out = Vec::with_capacity(rows.len());
            for mut row in rows {
                let value = eval_with_ctx(expr, &row, ctx)?;
                row.insert(var.clone(), value);
                out.push(row);
            }
            Ok(out)
        }
        PlanNode::Sort(input, keys) => {
            let rows = exec_rows(input, ctx, base)?;
            exec_sort(rows, keys, ctx)
        }
        PlanNode::Limit(input, offset, count) => {
            let rows = exec_rows(input, ctx, base)?;
            Ok(exec_limit(rows, *offset, *count))
        }
        PlanNode::Aggregate(input, clause) => {
            let rows = exec_rows(input, ctx, base)?;
            exec_aggregate(rows, clause, ctx)
        }
        PlanNode::CTEMaterialize { name, input } => {
            let rows = exec_rows(input, ctx, base)?;
            ctx.cte_cache.put(name, extract_return(rows))?;
            Ok(Vec::new())
        }
        PlanNode::CTERef { var, name } => {
            let values = ctx.cte_cache.get(name)?;
            Ok(values
                .into_iter()
                .map(|v| {
                    let mut row = base.clone();
                    row.insert(var.clone(), v);
                    row
                })
                .collect())
        }
        PlanNode::Project(input, expr) => {
            let rows = exec_rows(input, ctx, base)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let value = eval_with_ctx(expr, &row, ctx)?;
                let mut out_row = Row::new();
                out_row.insert(RETURN_KEY.to_string(), value);
                out.push(out_row);
            }
            Ok(out)
        }
    }
}

fn exec_sort(mut rows: Vec<Row>, keys: &[SortKey], ctx: &mut QueryContext) -> Result<Vec<Row>> {
    let mut decorated: Vec<(Vec<Value>, Row)> = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        let mut vals = Vec::with_capacity(keys.len());
        for k in keys {
            vals.push(eval_with_ctx(&k.expr, &row, ctx)?);
        }
        decorated.push((vals, row));
    }
    decorated.sort_by(|a, b| {
        for (i, k) in keys.iter().enumerate() {
            let ord = a.0[i].partial_cmp(&b.0[i]).unwrap_or(std::cmp::Ordering::Equal);
            let ord = if k.descending { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(decorated.into_iter().map(|(_, r)| r).collect())
}

fn exec_limit(rows: Vec<Row>, offset: i64, count: i64) -> Vec<Row> {
    let offset = offset.max(0) as usize;
    let count = count.max(0) as usize;
    rows.into_iter().skip(offset).take(count).collect()
}

fn exec_aggregate(input: Vec<Row>, clause: &CollectClause, ctx: &mut QueryContext) -> Result<Vec<Row>> {
    let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();

    for row in input {
        let mut key_values = Vec::with_capacity(clause.group_by.len());
        for (_, expr) in &clause.group_by {
            key_values.push(eval_with_ctx(expr, &row, ctx)?);
        }
        let key_bytes: Vec<u8> = key_values.iter().flat_map(Value::canonical_bytes).collect();
        let idx = *index.entry(key_bytes).or_insert_with(|| {
            groups.push((key_values.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[idx].1.push(row);
    }
    if groups.is_empty() && clause.group_by.is_empty() {
        groups.push((Vec::new(), Vec::new()));
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key_values, rows) in groups {
        let mut out_row = Row::new();
        for ((name, _), value) in clause.group_by.iter().zip(key_values) {
            out_row.insert(name.clone(), value);
        }
        if let Some(into_var) = &clause.into_var {
            let arr = rows.iter().map(|r| Value::Object(r.clone())).collect();
            out_row.insert(into_var.clone(), Value::Array(arr));
        }
        for (name, func, expr) in &clause.aggregates {
            let value = eval_aggregate(*func, expr, &rows, ctx)?;
            out_row.insert(name.clone(), value);
        }
        out.push(out_row);
    }
    Ok(out)
}

fn eval_aggregate(func: AggFunc, expr: &Expr, rows: &[Row], ctx: &mut QueryContext) -> Result<Value> {
    if matches!(func, AggFunc::Count) {
        return Ok(Value::I64(rows.len() as i64));
    }
    let mut nums = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(n) = eval_with_ctx(expr, row, ctx)?.as_f64() {
            nums.push(n);
        }
    }
    Ok(match func {
        AggFunc::Sum => Value::F64(nums.iter().sum()),
        AggFunc::Avg => {
            if nums.is_empty() {
                Value::Null
            } else {
                Value::F64(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggFunc::Min => nums.into_iter().fold(None, |acc, x| Some(acc.map_or(x, |a: f64| a.min(x)))).map(Value::F64).unwrap_or(Value::Null),
        AggFunc::Max => nums.into_iter().fold(None, |acc, x| Some(acc.map_or(x, |a: f64| a.max(x)))).map(Value::F64).unwrap_or(Value::Null),
        AggFunc::Count => unreachable!("handled above"),
    })
}

fn exec_traversal(
    vertex_var: &str,
    edge_var: Option<&str>,
    direction: AstDirection,
    start: &Expr,
    min_depth: u32,
    max_depth: u32,
    ctx: &mut QueryContext,
    base: &Row,
) -> Result<Vec<Row>> {
    let start_value = eval_with_ctx(start, base, ctx)?;
    let Some(start_id) = start_value.as_str().map(str::to_string) else {
        return Err(ThemisError::ValueKindMismatch {
            context: "graph traversal start".into(),
            expected: "string document id".into(),
            got: start_value.kind_name().into(),
        });
    };
    let core_direction = match direction {
        AstDirection::Outbound => themis_core::graph::Direction::Outbound,
        AstDirection::Inbound => themis_core::graph::Direction::Inbound,
    };
    let visited = themis_core::graph::bfs(ctx.engine, &start_id, core_direction, max_depth, MAX_BRANCHING)?;
    let mut out = Vec::new();
    for (vertex_id, depth) in visited {
        if depth < min_depth {
            continue;
        }
        let mut row = base.clone();
        row.insert(vertex_var.to_string(), doc_id_to_value(&vertex_id, ctx)?);
        if let Some(ev) = edge_var {
            // Edge identity along a multi-hop BFS order isn't single-valued
            // per vertex; callers that need it should use SHORTEST_PATH.
            row.insert(ev.to_string(), Value::Null);
        }
        out.push(row);
    }
    Ok(out)
}

fn exec_shortest_path(
    vertex_var: &str,
    edge_var: Option<&str>,
    start: &Expr,
    target: &Expr,
    ctx: &mut QueryContext,
    base: &Row,
) -> Result<Vec<Row>> {
    let start_value = eval_with_ctx(start, base, ctx)?;
    let target_value = eval_with_ctx(target, base, ctx)?;
    let (Some(from), Some(to)) = (start_value.as_str().map(str::to_string), target_value.as_str().map(str::to_string)) else {
        return Err(ThemisError::ValueKindMismatch {
            context: "SHORTEST_PATH endpoints".into(),
            expected: "string document ids".into(),
            got: format!("{}/{}", start_value.kind_name(), target_value.kind_name()),
        });
    };
    let Some(path) = themis_core::graph::shortest_path(ctx.engine, &from, &to, MAX_SHORTEST_PATH_DEPTH, MAX_BRANCHING)? else {
        return Ok(Vec::new());
    };
    let mut vertices = Vec::with_capacity(path.len());
    for id in &path {
        vertices.push(doc_id_to_value(id, ctx)?);
    }
    let mut row = base.clone();
    row.insert(vertex_var.to_string(), Value::Array(vertices));
    if let Some(ev) = edge_var {
        let edges = edges_along_path(&path, ctx)?;
        row.insert(ev.to_string(), Value::Array(edges));
    }
    Ok(vec![row])
}

/// Edges live in a single `edges` table by convention -- the only one this
/// graph layer assumes, since adjacency rows store the opposite vertex id
/// but not which collection the edge entity itself belongs to.
fn edges_along_path(path: &[String], ctx: &mut QueryContext) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(path.len().saturating_sub(1));
    for pair in path.windows(2) {
        let neighbors = themis_core::graph::neighbors(ctx.engine, &pair[0], themis_core::graph::Direction::Outbound)?;
        let edge_id = neighbors.into_iter().find(|(_, to)| *to == pair[1]).map(|(edge_id, _)| edge_id);
        out.push(match edge_id {
            Some(id) => doc_id_to_value(&format!("edges/{id}"), ctx)?,
            None => Value::Null,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::sync::Arc;
    use themis_core::catalog::{IndexDef, IndexKind};
    use themis_core::kv::SledEngine;
    use themis_core::store::entity_store::{EntityStore, NullUndoSink};

    fn setup() -> (Arc<dyn KvEngine>, Arc<EntityStore>, Arc<IndexCatalog>) {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        let store = Arc::new(EntityStore::new(engine.clone(), catalog.clone()));
        (engine, store, catalog)
    }

    fn run(engine: &dyn KvEngine, store: &EntityStore, catalog: &IndexCatalog, aql: &str) -> Vec<Value> {
        let query = parse(aql).unwrap();
        let cache = CteCache::new(16 * 1024 * 1024, std::env::temp_dir());
        let mut ctx = QueryContext::new(engine, store, catalog, HashMap::new(), cache);
        execute(&query, &mut ctx).unwrap()
    }

    #[test]
    fn scans_and_filters_a_table() {
        let (engine, store, catalog) = setup();
        for (pk, city) in [("u1", "Berlin"), ("u2", "Paris")] {
            let e = Entity::new("users", pk, 0).with_field("city", Value::String(city.into()));
            store.put(&e, &mut NullUndoSink).unwrap();
        }
        let out = run(engine.as_ref(), store.as_ref(), catalog.as_ref(), r#"FOR u IN users FILTER u.city == "Berlin" RETURN u._key"#);
        assert_eq!(out, vec![Value::String("u1".into())]);
    }

    #[test]
    fn uses_an_equality_index_when_one_exists() {
        let (engine, store, catalog) = setup();
        catalog.register(IndexDef { table: "users".into(), columns: vec!["city".into()], kind: IndexKind::Equality, vector_dim: None });
        for (pk, city) in [("u1", "Berlin"), ("u2", "Berlin"), ("u3", "Paris")] {
            let e = Entity::new("users", pk, 0).with_field("city", Value::String(city.into()));
            store.put(&e, &mut NullUndoSink).unwrap();
        }
        let mut out = run(engine.as_ref(), store.as_ref(), catalog.as_ref(), r#"FOR u IN users FILTER u.city == "Berlin" RETURN u._key"#);
        out.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        assert_eq!(out, vec![Value::String("u1".into()), Value::String("u2".into())]);
    }

    #[test]
    fn sort_and_limit_apply_after_scan() {
        let (engine, store, catalog) = setup();
        for (pk, age) in [("u1", 30), ("u2", 10), ("u3", 20)] {
            let e = Entity::new("users", pk, 0).with_field("age", Value::I64(age));
            store.put(&e, &mut NullUndoSink).unwrap();
        }
        let out = run(engine.as_ref(), store.as_ref(), catalog.as_ref(), "FOR u IN users SORT u.age LIMIT 2 RETURN u.age");
        assert_eq!(out, vec![Value::I64(10), Value::I64(20)]);
    }

    #[test]
    fn collect_aggregates_groups() {
        let (engine, store, catalog) = setup();
        for (pk, city, n) in [("u1", "Berlin", 1), ("u2", "Berlin", 2), ("u3", "Paris", 5)] {
            let e = Entity::new("users", pk, 0).with_field("city", Value::String(city.into())).with_field("n", Value::I64(n));
            store.put(&e, &mut NullUndoSink).unwrap();
        }
        let out = run(
            engine.as_ref(),
            store.as_ref(),
            catalog.as_ref(),
            "FOR u IN users COLLECT city = u.city AGGREGATE total = SUM(u.n) RETURN {city: city, total: total}",
        );
        let mut totals: Vec<(String, f64)> = out
            .into_iter()
            .map(|v| match v {
                Value::Object(o) => (
                    o.get("city").and_then(Value::as_str).unwrap().to_string(),
                    o.get("total").and_then(Value::as_f64).unwrap(),
                ),
                _ => panic!("expected object"),
            })
            .collect();
        totals.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(totals, vec![("Berlin".to_string(), 3.0), ("Paris".to_string(), 5.0)]);
    }

    #[test]
    fn with_cte_materializes_before_the_body_runs() {
        let (engine, store, catalog) = setup();
        let e = Entity::new("users", "u1", 0).with_field("city", Value::String("Berlin".into()));
        store.put(&e, &mut NullUndoSink).unwrap();
        let out = run(engine.as_ref(), store.as_ref(), catalog.as_ref(), "WITH berliners AS (FOR u IN users RETURN u.city) FOR c IN berliners RETURN c");
        assert_eq!(out, vec![Value::String("Berlin".into())]);
    }

    #[test]
    fn nested_loop_join_crosses_two_for_sources() {
        let (engine, store, catalog) = setup();
        store.put(&Entity::new("a", "a1", 0).with_field("n", Value::I64(1)), &mut NullUndoSink).unwrap();
        store.put(&Entity::new("b", "b1", 0).with_field("n", Value::I64(2)), &mut NullUndoSink).unwrap();
        let out = run(engine.as_ref(), store.as_ref(), catalog.as_ref(), "FOR x IN a FOR y IN b RETURN x.n + y.n");
        assert_eq!(out, vec![Value::I64(3)]);
    }
}
