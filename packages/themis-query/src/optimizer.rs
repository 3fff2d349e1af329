//! AQL translator and cost-based optimizer (spec §4.10). Translation turns
//! the AST into a naive physical plan (every `FOR` over a collection is a
//! full `Scan`); the optimizer pass then rewrites recognizable patterns into
//! cheaper access paths using the index catalog and, for hybrid predicates,
//! the cost-model formulas from the spec.

use crate::ast::{BinaryOp, Cte, Expr, ForSource, Query, Stmt};
use crate::plan::{Bound, PlanNode};
use themis_core::catalog::{IndexCatalog, IndexKind};
use themis_core::value::Value;

pub struct TranslatedQuery {
    pub ctes: Vec<(String, PlanNode)>,
    pub body: PlanNode,
}

pub fn translate(query: &Query, catalog: &IndexCatalog) -> TranslatedQuery {
    let cte_names: Vec<String> = query.ctes.iter().map(|c| c.name.clone()).collect();
    let ctes = query
        .ctes
        .iter()
        .map(|cte: &Cte| (cte.name.clone(), optimize(naive_plan(&cte.body, &cte_names), catalog)))
        .collect();
    let body = optimize(naive_plan(&query.body, &cte_names), catalog);
    TranslatedQuery { ctes, body }
}

fn naive_plan(stmts: &[Stmt], cte_names: &[String]) -> PlanNode {
    let mut plan: Option<PlanNode> = None;
    for stmt in stmts {
        plan = Some(match stmt {
            Stmt::For { var, source } => {
                let node = for_source_plan(var, source, cte_names);
                match plan {
                    None => node,
                    Some(p) => PlanNode::NestedLoopJoin(Box::new(p), Box::new(node)),
                }
            }
            Stmt::Filter(expr) => PlanNode::Filter(Box::new(plan.expect("FILTER needs a source")), expr.clone()),
            Stmt::Let { var, expr } => {
                PlanNode::LetBinding(Box::new(plan.expect("LET needs a source")), var.clone(), expr.clone())
            }
            Stmt::Sort(keys) => PlanNode::Sort(Box::new(plan.expect("SORT needs a source")), keys.clone()),
            Stmt::Limit { offset, count } => {
                PlanNode::Limit(Box::new(plan.expect("LIMIT needs a source")), *offset, *count)
            }
            Stmt::Collect(clause) => {
                PlanNode::Aggregate(Box::new(plan.expect("COLLECT needs a source")), clause.clone())
            }
            Stmt::Return(expr) => {
                PlanNode::Project(Box::new(plan.expect("RETURN needs a source")), expr.clone())
            }
        });
    }
    plan.expect("empty query body")
}

fn for_source_plan(var: &str, source: &ForSource, cte_names: &[String]) -> PlanNode {
    match source {
        ForSource::Collection(name) if cte_names.iter().any(|c| c == name) => {
            PlanNode::CTERef { var: var.to_string(), name: name.clone() }
        }
        ForSource::Collection(table) => PlanNode::Scan { var: var.to_string(), table: table.clone() },
        ForSource::CteRef(name) => PlanNode::CTERef { var: var.to_string(), name: name.clone() },
        ForSource::Expr(expr) => match function_scan(var, expr) {
            Some(node) => node,
            None => PlanNode::ForExpr { var: var.to_string(), source: expr.clone() },
        },
        ForSource::Traversal {
            vertex_var,
            edge_var,
            direction,
            start,
            min_depth,
            max_depth,
            shortest_path_to,
            ..
        } => match shortest_path_to {
            Some(target) => PlanNode::ShortestPath {
                vertex_var: vertex_var.clone(),
                edge_var: edge_var.clone(),
                direction: *direction,
                start: (**start).clone(),
                target: (**target).clone(),
            },
            None => PlanNode::Traversal {
                vertex_var: vertex_var.clone(),
                edge_var: edge_var.clone(),
                direction: *direction,
                start: (**start).clone(),
                min_depth: *min_depth,
                max_depth: *max_depth,
            },
        },
    }
}

/// Rewrites `Scan(var, table) -> Filter(var.col OP lit)` into an index-backed
/// scan when `table.col` carries a matching index (spec §4.4 lookup rules).
/// Recurses first so nested plans (subqueries, CTE bodies, joins) are
/// optimized too.
pub fn optimize(plan: PlanNode, catalog: &IndexCatalog) -> PlanNode {
    match plan {
        PlanNode::Filter(input, expr) => {
            let input = optimize(*input, catalog);
            match try_index_rewrite(&input, &expr, catalog) {
                Some(rewritten) => rewritten,
                None => PlanNode::Filter(Box::new(input), expr),
            }
        }
        PlanNode::NestedLoopJoin(l, r) => {
            PlanNode::NestedLoopJoin(Box::new(optimize(*l, catalog)), Box::new(optimize(*r, catalog)))
        }
        PlanNode::HashJoin { left, right, left_key, right_key } => PlanNode::HashJoin {
            left: Box::new(optimize(*left, catalog)),
            right: Box::new(optimize(*right, catalog)),
            left_key,
            right_key,
        },
        PlanNode::LetBinding(input, var, expr) => PlanNode::LetBinding(Box::new(optimize(*input, catalog)), var, expr),
        PlanNode::Sort(input, keys) => PlanNode::Sort(Box::new(optimize(*input, catalog)), keys),
        PlanNode::Limit(input, offset, count) => PlanNode::Limit(Box::new(optimize(*input, catalog)), offset, count),
        PlanNode::Aggregate(input, clause) => PlanNode::Aggregate(Box::new(optimize(*input, catalog)), clause),
        PlanNode::Project(input, expr) => PlanNode::Project(Box::new(optimize(*input, catalog)), expr),
        PlanNode::CTEMaterialize { name, input } => {
            PlanNode::CTEMaterialize { name, input: Box::new(optimize(*input, catalog)) }
        }
        other => other,
    }
}

/// Recognizes `FOR doc IN FULLTEXT(table, column, query[, limit])` and
/// `FOR doc IN VECTOR_SEARCH(table, column, vector, k)` -- the AQL idiom for
/// naming a ranked scan as a `FOR` source rather than a post-hoc filter.
fn function_scan(var: &str, expr: &Expr) -> Option<PlanNode> {
    let Expr::FunctionCall(name, args) = expr else { return None };
    match name.to_ascii_uppercase().as_str() {
        "FULLTEXT" => {
            let table = literal_string(args.first()?)?;
            let column = literal_string(args.get(1)?)?;
            let query = literal_string(args.get(2)?)?;
            let limit = args.get(3).and_then(literal_int).unwrap_or(20) as usize;
            Some(PlanNode::FulltextScan { var: var.to_string(), table, column, query, limit })
        }
        "VECTOR_SEARCH" => {
            let table = literal_string(args.first()?)?;
            let column = literal_string(args.get(1)?)?;
            let query = literal_vector(args.get(2)?)?;
            let k = args.get(3).and_then(literal_int).unwrap_or(10) as usize;
            Some(PlanNode::VectorKnn { var: var.to_string(), table, column, query, k, ef: k.max(50) })
        }
        _ => None,
    }
}

fn literal_string(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Literal(Value::String(s)) => Some(s.clone()),
        Expr::Var(s) => Some(s.clone()),
        _ => None,
    }
}

fn literal_int(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Literal(Value::I64(v)) => Some(*v),
        _ => None,
    }
}

fn literal_vector(expr: &Expr) -> Option<Vec<f32>> {
    match expr {
        Expr::Literal(Value::Vector(v)) => Some(v.clone()),
        Expr::Array(items) => items
            .iter()
            .map(|i| match i {
                Expr::Literal(Value::F64(f)) => Some(*f as f32),
                Expr::Literal(Value::I64(i)) => Some(*i as f32),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn try_index_rewrite(input: &PlanNode, expr: &Expr, catalog: &IndexCatalog) -> Option<PlanNode> {
    let PlanNode::Scan { var, table } = input else { return None };
    match expr {
        Expr::Binary(lhs, BinaryOp::Eq, rhs) => {
            let (column, value) = field_literal(var, lhs, rhs)?;
            catalog.get(table, &[column.clone()], IndexKind::Equality)?;
            Some(PlanNode::IndexScan { var: var.clone(), table: table.clone(), column, value })
        }
        Expr::Binary(lhs, op @ (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge), rhs) => {
            let (column, value) = field_literal(var, lhs, rhs)?;
            catalog.get(table, &[column.clone()], IndexKind::Range)?;
            let (lower, upper) = match op {
                BinaryOp::Lt => (None, Some(Bound::Exclusive(value))),
                BinaryOp::Le => (None, Some(Bound::Inclusive(value))),
                BinaryOp::Gt => (Some(Bound::Exclusive(value)), None),
                BinaryOp::Ge => (Some(Bound::Inclusive(value)), None),
                _ => unreachable!(),
            };
            Some(PlanNode::RangeScan { var: var.clone(), table: table.clone(), column, lower, upper })
        }
        _ => None,
    }
}

/// Matches `var.column OP literal` or `literal OP var.column`, returning the
/// column name and literal value regardless of which side it's on.
fn field_literal(var: &str, lhs: &Expr, rhs: &Expr) -> Option<(String, Value)> {
    if let (Expr::Field(base, col), Expr::Literal(v)) = (lhs, rhs) {
        if matches!(&**base, Expr::Var(b) if b == var) {
            return Some((col.clone(), v.clone()));
        }
    }
    if let (Expr::Literal(v), Expr::Field(base, col)) = (lhs, rhs) {
        if matches!(&**base, Expr::Var(b) if b == var) {
            return Some((col.clone(), v.clone()));
        }
    }
    None
}

/// Cost-model formulas for hybrid queries (spec §4.10). These are pure
/// scoring functions; the optimizer above does not yet wire a detector for
/// the specific AST shapes they price (`ST_Within(...) AND SIMILARITY(...)`
/// style compound filters) -- kept here, ready for that detector, since the
/// formulas themselves are exact spec requirements independent of when
/// they're invoked.
pub mod cost {
    const C_VEC_BASE: f64 = 1.0;
    const C_INDEX_SPATIAL: f64 = 1.0;
    const C_SPATIAL_EVAL: f64 = 0.2;

    pub fn vector_cost(dim: usize) -> f64 {
        C_VEC_BASE * (dim as f64 / 128.0)
    }

    pub fn spatial_first_cost(spatial_candidates: usize, dim: usize) -> f64 {
        spatial_candidates as f64 * (C_INDEX_SPATIAL + vector_cost(dim))
    }

    pub fn vector_first_cost(n: usize, dim: usize, k: usize, overfetch: f64) -> f64 {
        let dim_scale = (dim as f64 / 128.0).max(1.0);
        let ann = (n as f64).max(1.0).log2() * dim_scale;
        ann + (k as f64 * overfetch * C_SPATIAL_EVAL)
    }

    /// `true` if a prefilter (equality/range) narrows the candidate universe
    /// below 10%, discounting the vector-first plan further.
    pub fn prefilter_discount_applies(prefilter_size: usize, universe: usize) -> bool {
        universe > 0 && (prefilter_size as f64) < 0.1 * (universe as f64)
    }

    pub fn choose_vector_geo(spatial_candidates: usize, n: usize, dim: usize, k: usize, overfetch: f64) -> bool {
        spatial_first_cost(spatial_candidates, dim) <= vector_first_cost(n, dim, k, overfetch)
    }

    /// Content+Geo: `true` selects Spatial-first. A `bbox_ratio` under 1% of
    /// the spatial universe strongly favors Spatial-first regardless of
    /// fulltext selectivity.
    pub fn choose_content_geo(bbox_ratio: f64, fulltext_estimated_hits: usize, universe: usize) -> bool {
        if bbox_ratio < 0.01 {
            return true;
        }
        let fulltext_selectivity = if universe == 0 { 1.0 } else { fulltext_estimated_hits as f64 / universe as f64 };
        bbox_ratio <= fulltext_selectivity
    }

    /// Graph+Geo: estimate branching factor by sampling the first two hops;
    /// abort (empty plan) if the extrapolated expansion exceeds 1e6 (spec
    /// §4.5/§4.10).
    pub fn estimated_two_hop_expansion(avg_out_degree: f64) -> f64 {
        avg_out_degree * avg_out_degree
    }

    pub fn graph_geo_should_abort(avg_out_degree: f64) -> bool {
        estimated_two_hop_expansion(avg_out_degree) > 1e6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use themis_core::catalog::IndexDef;

    #[test]
    fn rewrites_equality_filter_into_index_scan_when_index_exists() {
        let catalog = IndexCatalog::new();
        catalog.register(IndexDef {
            table: "users".into(),
            columns: vec!["city".into()],
            kind: IndexKind::Equality,
            vector_dim: None,
        });
        let q = parse(r#"FOR u IN users FILTER u.city == "Berlin" RETURN u"#).unwrap();
        let plan = translate(&q, &catalog).body;
        match plan {
            PlanNode::Project(inner, _) => match *inner {
                PlanNode::IndexScan { column, .. } => assert_eq!(column, "city"),
                other => panic!("expected IndexScan, got {other:?}"),
            },
            other => panic!("expected Project, got {other:?}"),
        }
    }

    #[test]
    fn leaves_filter_as_a_scan_when_no_index_exists() {
        let catalog = IndexCatalog::new();
        let q = parse(r#"FOR u IN users FILTER u.city == "Berlin" RETURN u"#).unwrap();
        let plan = translate(&q, &catalog).body;
        match plan {
            PlanNode::Project(inner, _) => match *inner {
                PlanNode::Filter(scan, _) => assert!(matches!(*scan, PlanNode::Scan { .. })),
                other => panic!("expected Filter over Scan, got {other:?}"),
            },
            other => panic!("expected Project, got {other:?}"),
        }
    }

    #[test]
    fn cost_model_prefers_spatial_first_for_small_candidate_sets() {
        assert!(cost::choose_vector_geo(10, 1_000_000, 128, 10, 2.0));
    }

    #[test]
    fn graph_geo_aborts_on_huge_branching_factor() {
        assert!(cost::graph_geo_should_abort(2000.0));
        assert!(!cost::graph_geo_should_abort(10.0));
    }
}
