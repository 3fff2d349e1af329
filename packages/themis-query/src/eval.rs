//! Expression evaluation shared by `Filter`, `Sort`, `LetBinding`, `Project`,
//! and `Aggregate` plan nodes.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use std::collections::BTreeMap;
use themis_core::error::{Result, ThemisError};
use themis_core::value::Value;

pub type Row = BTreeMap<String, Value>;

/// Callback the executor supplies so function calls like `LENGTH`/`AVG` and
/// subqueries can be evaluated without `eval` depending on the executor
/// module directly (keeps plan evaluation and plan execution decoupled).
pub trait EvalHost {
    fn bind_var(&self, name: &str) -> Option<Value>;
    fn run_scalar_subquery(&mut self, query: &crate::ast::Query, outer: &Row) -> Result<Value>;
    fn run_array_subquery(&mut self, query: &crate::ast::Query, outer: &Row) -> Result<Vec<Value>>;
}

pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::I64(i) => *i != 0,
        Value::F64(f) => *f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

pub fn eval(expr: &Expr, row: &Row, host: &mut dyn EvalHost) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::BindVar(name) => Ok(host
            .bind_var(name)
            .ok_or_else(|| ThemisError::Unsupported(format!("unbound bind variable '@{name}'")))?),
        Expr::Var(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Field(base, field) => {
            let v = eval(base, row, host)?;
            Ok(match v {
                Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        Expr::Index(base, idx) => {
            let v = eval(base, row, host)?;
            let i = eval(idx, row, host)?;
            Ok(match (v, i) {
                (Value::Array(items), Value::I64(n)) => {
                    usize::try_from(n).ok().and_then(|n| items.get(n).cloned()).unwrap_or(Value::Null)
                }
                (Value::Object(map), Value::String(k)) => map.get(&k).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!is_truthy(&eval(inner, row, host)?))),
        Expr::Unary(UnaryOp::Neg, inner) => match eval(inner, row, host)? {
            Value::I64(i) => Ok(Value::I64(-i)),
            Value::F64(f) => Ok(Value::F64(-f)),
            other => Err(ThemisError::ValueKindMismatch {
                context: "unary -".into(),
                expected: "i64 or f64".into(),
                got: other.kind_name().into(),
            }),
        },
        Expr::Binary(lhs, op, rhs) => eval_binary(lhs, *op, rhs, row, host),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, row, host)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Object(fields) => {
            let mut map = std::collections::BTreeMap::new();
            for (k, v) in fields {
                map.insert(k.clone(), eval(v, row, host)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Quantifier { any, var, source, predicate } => {
            let items = match eval(source, row, host)? {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let mut matched = false;
            let mut any_item = false;
            for item in items {
                any_item = true;
                let mut child = row.clone();
                child.insert(var.clone(), item);
                let ok = is_truthy(&eval(predicate, &child, host)?);
                if *any && ok {
                    matched = true;
                    break;
                }
                if !*any && !ok {
                    matched = false;
                    return Ok(Value::Bool(false));
                }
                matched = true;
            }
            if !*any && !any_item {
                matched = true;
            }
            Ok(Value::Bool(matched))
        }
        Expr::SubqueryScalar(q) => host.run_scalar_subquery(q, row),
        Expr::SubqueryArray(q) => Ok(Value::Array(host.run_array_subquery(q, row)?)),
        Expr::FunctionCall(name, args) => eval_function(name, args, row, host),
    }
}

fn eval_binary(lhs: &Expr, op: BinaryOp, rhs: &Expr, row: &Row, host: &mut dyn EvalHost) -> Result<Value> {
    if op == BinaryOp::And {
        let l = eval(lhs, row, host)?;
        if !is_truthy(&l) {
            return Ok(Value::Bool(false));
        }
        return Ok(Value::Bool(is_truthy(&eval(rhs, row, host)?)));
    }
    if op == BinaryOp::Or {
        let l = eval(lhs, row, host)?;
        if is_truthy(&l) {
            return Ok(Value::Bool(true));
        }
        return Ok(Value::Bool(is_truthy(&eval(rhs, row, host)?)));
    }

    let l = eval(lhs, row, host)?;
    let r = eval(rhs, row, host)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::Ne => Ok(Value::Bool(l != r)),
        BinaryOp::Lt => Ok(Value::Bool(l.partial_cmp(&r) == Some(std::cmp::Ordering::Less))),
        BinaryOp::Le => Ok(Value::Bool(matches!(
            l.partial_cmp(&r),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ))),
        BinaryOp::Gt => Ok(Value::Bool(l.partial_cmp(&r) == Some(std::cmp::Ordering::Greater))),
        BinaryOp::Ge => Ok(Value::Bool(matches!(
            l.partial_cmp(&r),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = (as_f64(&l), as_f64(&r));
            match (a, b) {
                (Some(a), Some(b)) => {
                    let result = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => a / b,
                        BinaryOp::Mod => a % b,
                        _ => unreachable!(),
                    };
                    if matches!((&l, &r), (Value::I64(_), Value::I64(_))) && op != BinaryOp::Div {
                        Ok(Value::I64(result as i64))
                    } else {
                        Ok(Value::F64(result))
                    }
                }
                _ => Err(ThemisError::ValueKindMismatch {
                    context: "arithmetic expression".into(),
                    expected: "numeric".into(),
                    got: format!("{}/{}", l.kind_name(), r.kind_name()),
                }),
            }
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_function(name: &str, args: &[Expr], row: &Row, host: &mut dyn EvalHost) -> Result<Value> {
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        values.push(eval(a, row, host)?);
    }
    match name.to_ascii_uppercase().as_str() {
        "LENGTH" => match values.first() {
            Some(Value::Array(a)) => Ok(Value::I64(a.len() as i64)),
            Some(Value::String(s)) => Ok(Value::I64(s.chars().count() as i64)),
            Some(Value::Object(o)) => Ok(Value::I64(o.len() as i64)),
            _ => Ok(Value::I64(0)),
        },
        "AVG" => match values.first() {
            Some(Value::Array(a)) if !a.is_empty() => {
                let sum: f64 = a.iter().filter_map(as_f64).sum();
                Ok(Value::F64(sum / a.len() as f64))
            }
            _ => Ok(Value::Null),
        },
        "BM25" | "SIMILARITY" | "PROXIMITY" => Ok(row.get("_score").cloned().unwrap_or(Value::F64(0.0))),
        "ST_POINT" => {
            let (x, y) = (values.first().and_then(as_f64), values.get(1).and_then(as_f64));
            match (x, y) {
                (Some(x), Some(y)) => Ok(Value::Geometry(serde_json::json!({
                    "type": "Point", "coordinates": [x, y]
                }))),
                _ => Err(ThemisError::Unsupported("ST_Point requires two numeric args".into())),
            }
        }
        "ST_DISTANCE" => {
            let (p1, p2) = (point_coords(values.first()), point_coords(values.get(1)));
            match (p1, p2) {
                (Some((x1, y1)), Some((x2, y2))) => {
                    Ok(Value::F64(((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt()))
                }
                _ => Err(ThemisError::Unsupported("ST_Distance requires two point geometries".into())),
            }
        }
        "ST_DWITHIN" => {
            let (p1, p2, dist) = (point_coords(values.first()), point_coords(values.get(1)), values.get(2).and_then(as_f64));
            match (p1, p2, dist) {
                (Some((x1, y1)), Some((x2, y2)), Some(d)) => {
                    Ok(Value::Bool(((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt() <= d))
                }
                _ => Err(ThemisError::Unsupported("ST_DWithin requires two points and a distance".into())),
            }
        }
        "ST_WITHIN" => {
            let point = point_coords(values.first());
            let bbox = values.get(1).and_then(|v| match v {
                Value::Array(a) if a.len() == 4 => {
                    let nums: Option<Vec<f64>> = a.iter().map(as_f64).collect();
                    nums
                }
                _ => None,
            });
            match (point, bbox) {
                (Some((x, y)), Some(b)) => Ok(Value::Bool(x >= b[0] && x <= b[2] && y >= b[1] && y <= b[3])),
                _ => Err(ThemisError::Unsupported("ST_Within requires a point and a [minx,miny,maxx,maxy] bbox".into())),
            }
        }
        "ST_ASTEXT" => match point_coords(values.first()) {
            Some((x, y)) => Ok(Value::String(format!("POINT({x} {y})"))),
            None => Err(ThemisError::Unsupported("ST_AsText requires a point geometry".into())),
        },
        "ST_BUFFER" | "ST_UNION" => Err(ThemisError::Unsupported(format!("{name} geometry ops are not implemented"))),
        other => Err(ThemisError::Unsupported(format!("unknown function {other}"))),
    }
}

fn point_coords(v: Option<&Value>) -> Option<(f64, f64)> {
    match v {
        Some(Value::Geometry(g)) => {
            let coords = g.get("coordinates")?.as_array()?;
            Some((coords.first()?.as_f64()?, coords.get(1)?.as_f64()?))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHost;
    impl EvalHost for NoopHost {
        fn bind_var(&self, _name: &str) -> Option<Value> {
            None
        }
        fn run_scalar_subquery(&mut self, _q: &crate::ast::Query, _outer: &Row) -> Result<Value> {
            Ok(Value::Null)
        }
        fn run_array_subquery(&mut self, _q: &crate::ast::Query, _outer: &Row) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn field_access_reads_from_object_bound_value() {
        let mut row = Row::new();
        let mut obj = std::collections::BTreeMap::new();
        obj.insert("city".to_string(), Value::String("Berlin".into()));
        row.insert("u".to_string(), Value::Object(obj));
        let expr = Expr::Field(Box::new(Expr::Var("u".into())), "city".into());
        assert_eq!(eval(&expr, &row, &mut NoopHost).unwrap(), Value::String("Berlin".into()));
    }

    #[test]
    fn arithmetic_preserves_integer_type_for_add_sub_mul() {
        let expr = Expr::Binary(Box::new(Expr::Literal(Value::I64(2))), BinaryOp::Add, Box::new(Expr::Literal(Value::I64(3))));
        assert_eq!(eval(&expr, &Row::new(), &mut NoopHost).unwrap(), Value::I64(5));
    }

    #[test]
    fn quantifier_any_short_circuits_on_first_match() {
        let arr = Expr::Array(vec![Expr::Literal(Value::I64(1)), Expr::Literal(Value::I64(2))]);
        let pred = Expr::Binary(Box::new(Expr::Var("t".into())), BinaryOp::Eq, Box::new(Expr::Literal(Value::I64(2))));
        let expr = Expr::Quantifier { any: true, var: "t".into(), source: Box::new(arr), predicate: Box::new(pred) };
        assert_eq!(eval(&expr, &Row::new(), &mut NoopHost).unwrap(), Value::Bool(true));
    }
}
