//! Physical plan tree (spec §4.10): what the translator/optimizer produces
//! and the executor pulls rows from.

use crate::ast::{CollectClause, Direction, Expr, SortKey};
use themis_core::value::Value;

#[derive(Debug, Clone)]
pub enum Bound {
    Inclusive(Value),
    Exclusive(Value),
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    /// Full entity-store scan of a table, binding each row to `var`.
    Scan { var: String, table: String },
    IndexScan { var: String, table: String, column: String, value: Value },
    RangeScan {
        var: String,
        table: String,
        column: String,
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    CompositeScan { var: String, table: String, columns: Vec<String>, values: Vec<Value> },
    FulltextScan { var: String, table: String, column: String, query: String, limit: usize },
    VectorKnn { var: String, table: String, column: String, query: Vec<f32>, k: usize, ef: usize },
    Traversal {
        vertex_var: String,
        edge_var: Option<String>,
        direction: Direction,
        start: Expr,
        min_depth: u32,
        max_depth: u32,
    },
    ShortestPath {
        vertex_var: String,
        edge_var: Option<String>,
        direction: Direction,
        start: Expr,
        target: Expr,
    },
    /// `FOR` over an arbitrary array-valued expression (CTE ref, subquery, literal array).
    ForExpr { var: String, source: Expr },
    /// Cross/nested-loop join between two already-planned `FOR` sources; the
    /// right side is re-evaluated once per left row (spec §4.11 NestedLoop).
    NestedLoopJoin(Box<PlanNode>, Box<PlanNode>),
    /// Equi-join between two `FOR` sources on `left_key == right_key`,
    /// used instead of `NestedLoopJoin` when the optimizer recognizes a
    /// `FILTER a.x == b.y` tying two independent `FOR`s together.
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_key: Expr,
        right_key: Expr,
    },
    Filter(Box<PlanNode>, Expr),
    LetBinding(Box<PlanNode>, String, Expr),
    Sort(Box<PlanNode>, Vec<SortKey>),
    Limit(Box<PlanNode>, i64, i64),
    Aggregate(Box<PlanNode>, CollectClause),
    CTEMaterialize { name: String, input: Box<PlanNode> },
    CTERef { var: String, name: String },
    Project(Box<PlanNode>, Expr),
}

pub use crate::ast::AggFunc as PlanAggFunc;
