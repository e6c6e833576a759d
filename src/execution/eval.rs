//! Expression evaluation.
//!
//! Cypher null semantics throughout: most operators return NULL when an
//! operand is NULL, and the logical operators use three-valued logic.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::MemoryGraph;
use crate::{Error, Result};

/// Variable bindings of one row flowing through the clause pipeline.
pub type Row = BTreeMap<String, Value>;

const AGGREGATES: &[&str] = &["count", "collect", "sum", "avg", "min", "max"];

pub fn is_aggregate(name: &str) -> bool {
    AGGREGATES.iter().any(|a| a.eq_ignore_ascii_case(name))
}

/// True if the expression contains an aggregate call anywhere.
pub fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Call { func, .. } if is_aggregate(func) => true,
        other => other.children().into_iter().any(contains_aggregate),
    }
}

/// Read-only evaluation scope: the graph (for refreshing entities) and the
/// query parameters.
pub struct Evaluator<'a> {
    pub graph: &'a MemoryGraph,
    pub params: &'a PropertyMap,
}

impl<'a> Evaluator<'a> {
    pub fn new(graph: &'a MemoryGraph, params: &'a PropertyMap) -> Self {
        Self { graph, params }
    }

    /// Current state of a bound node or relationship. Entities deleted
    /// earlier in the query keep their last known state.
    pub fn refresh(&self, value: &Value) -> Value {
        match value {
            Value::Node(n) => match self.graph.node(n.id) {
                Some(current) => Value::Node(Box::new(current.clone())),
                None => value.clone(),
            },
            Value::Relationship(r) => match self.graph.relationship(r.id) {
                Some(current) => Value::Relationship(Box::new(current.clone())),
                None => value.clone(),
            },
            other => other.clone(),
        }
    }

    pub fn eval(&self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Var(name) => row
                .get(name)
                .map(|v| self.refresh(v))
                .ok_or_else(|| Error::SemanticError(format!("Variable `{name}` not defined"))),
            Expr::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::ParameterMissing(name.clone())),
            Expr::Prop(base, key) => property(&self.eval(base, row)?, key),
            Expr::List(items) => items
                .iter()
                .map(|e| self.eval(e, row))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Expr::Map(entries) => {
                let mut map = PropertyMap::with_capacity(entries.len());
                for (k, e) in entries {
                    map.insert(k.clone(), self.eval(e, row)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Binary(lhs, op, rhs) => {
                let l = self.eval(lhs, row)?;
                binary(*op, l, self.eval(rhs, row)?)
            }
            Expr::Unary(UnaryOp::Not, operand) => match self.eval(operand, row)? {
                Value::Null => Ok(Value::Null),
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(type_error("Boolean", &other)),
            },
            Expr::Unary(UnaryOp::Neg, operand) => match self.eval(operand, row)? {
                Value::Null => Ok(Value::Null),
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| Error::ExecutionError("integer overflow".into())),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(type_error("Number", &other)),
            },
            Expr::IsNull(operand, negated) => {
                let is_null = self.eval(operand, row)?.is_null();
                Ok(Value::Bool(is_null != *negated))
            }
            Expr::HasLabel(operand, label) => match self.eval(operand, row)? {
                Value::Null => Ok(Value::Null),
                Value::Node(n) => Ok(Value::Bool(n.has_label(label))),
                other => Err(type_error("Node", &other)),
            },
            Expr::Call { func, args, .. } => {
                if is_aggregate(func) {
                    return Err(Error::SemanticError(format!(
                        "Aggregate function {func}() is only allowed in RETURN"
                    )));
                }
                let values = args
                    .iter()
                    .map(|a| self.eval(a, row))
                    .collect::<Result<Vec<_>>>()?;
                call_function(func, values)
            }
        }
    }

    /// Evaluate a predicate: only `true` keeps the row.
    pub fn eval_predicate(&self, expr: &Expr, row: &Row) -> Result<bool> {
        match self.eval(expr, row)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(type_error("Boolean", &other)),
        }
    }

    /// Evaluate a pattern's property map (map literal or map parameter).
    pub fn eval_properties(&self, expr: Option<&Expr>, row: &Row) -> Result<PropertyMap> {
        match expr {
            None => Ok(PropertyMap::new()),
            Some(e) => match self.eval(e, row)? {
                Value::Map(map) => Ok(map),
                Value::Null => Ok(PropertyMap::new()),
                other => Err(type_error("Map", &other)),
            },
        }
    }
}

pub fn type_error(expected: &str, got: &Value) -> Error {
    Error::TypeError {
        expected: expected.into(),
        got: got.type_name().into(),
    }
}

fn property(base: &Value, key: &str) -> Result<Value> {
    match base {
        Value::Null => Ok(Value::Null),
        Value::Node(n) => Ok(n.property(key).cloned().unwrap_or(Value::Null)),
        Value::Relationship(r) => Ok(r.property(key).cloned().unwrap_or(Value::Null)),
        Value::Map(m) => Ok(m.get(key).cloned().unwrap_or(Value::Null)),
        other => Err(type_error("Node, Relationship or Map", other)),
    }
}

// ============================================================================
// Operators
// ============================================================================

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinOp::And | BinOp::Or | BinOp::Xor => logical(op, l, r),
        BinOp::Eq => Ok(l.cypher_eq(&r).map_or(Value::Null, Value::Bool)),
        BinOp::Ne => Ok(l.cypher_eq(&r).map_or(Value::Null, |eq| Value::Bool(!eq))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let Some(ord) = l.cypher_cmp(&r) else {
                return Ok(Value::Null);
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinOp::In => membership(&l, r),
        BinOp::StartsWith | BinOp::EndsWith | BinOp::Contains => Ok(match (l.as_str(), r.as_str()) {
            (Some(a), Some(b)) => Value::Bool(match op {
                BinOp::StartsWith => a.starts_with(b),
                BinOp::EndsWith => a.ends_with(b),
                _ => a.contains(b),
            }),
            _ => Value::Null,
        }),
        _ => arithmetic(op, l, r),
    }
}

/// `needle IN list`: NULL when the answer is unknown because of a NULL.
fn membership(needle: &Value, list: Value) -> Result<Value> {
    let items = match list {
        Value::Null => return Ok(Value::Null),
        Value::List(items) => items,
        other => return Err(type_error("List", &other)),
    };
    let mut unknown = false;
    for item in &items {
        match needle.cypher_eq(item) {
            Some(true) => return Ok(Value::Bool(true)),
            None => unknown = true,
            Some(false) => {}
        }
    }
    Ok(if unknown { Value::Null } else { Value::Bool(false) })
}

fn logical(op: BinOp, l: Value, r: Value) -> Result<Value> {
    let as_bool = |v: &Value| match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(type_error("Boolean", other)),
    };
    let (a, b) = (as_bool(&l)?, as_bool(&r)?);
    let out = match op {
        BinOp::And => match (a, b) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinOp::Or => match (a, b) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => match (a, b) {
            (Some(x), Some(y)) => Some(x != y),
            _ => None,
        },
    };
    Ok(out.map_or(Value::Null, Value::Bool))
}

fn arithmetic(op: BinOp, l: Value, r: Value) -> Result<Value> {
    let overflow = || Error::ExecutionError("integer overflow".into());
    match (op, l, r) {
        (_, Value::Null, _) | (_, _, Value::Null) => Ok(Value::Null),

        // Concatenation
        (BinOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (BinOp::Add, Value::List(mut a), b) => {
            a.push(b);
            Ok(Value::List(a))
        }
        (BinOp::Add, Value::String(a), b) if matches!(b, Value::String(_) | Value::Int(_) | Value::Float(_)) => {
            Ok(Value::String(format!("{a}{}", display_plain(&b))))
        }
        (BinOp::Add, a @ (Value::Int(_) | Value::Float(_)), Value::String(b)) => {
            Ok(Value::String(format!("{}{b}", display_plain(&a))))
        }

        (BinOp::Pow, a, b) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) if a.is_numeric() && b.is_numeric() => Ok(Value::Float(x.powf(y))),
            _ => Err(type_error("Number", if a.is_numeric() { &b } else { &a })),
        },

        (op, Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div if b == 0 => Err(Error::ExecutionError("/ by zero".into())),
            BinOp::Div => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mod if b == 0 => Err(Error::ExecutionError("% by zero".into())),
            BinOp::Mod => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
            _ => Err(Error::ExecutionError(format!("unsupported operator {op}"))),
        },

        (op, a, b) if a.is_numeric() && b.is_numeric() => {
            let (x, y) = (a.as_float().unwrap_or_default(), b.as_float().unwrap_or_default());
            Ok(Value::Float(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Mod => x % y,
                _ => return Err(Error::ExecutionError(format!("unsupported operator {op}"))),
            }))
        }

        (op, a, b) => Err(Error::TypeError {
            expected: format!("operands valid for '{op}'"),
            got: format!("{} and {}", a.type_name(), b.type_name()),
        }),
    }
}

/// Text of a scalar without the quoting `Display` adds to strings.
fn display_plain(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{f:.1}"),
        other => other.to_string(),
    }
}

// ============================================================================
// Scalar functions
// ============================================================================

fn call_function(name: &str, args: Vec<Value>) -> Result<Value> {
    let lower = name.to_ascii_lowercase();
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::SemanticError(format!(
                "{name}() expects {n} argument(s), got {}",
                args.len()
            )))
        }
    };

    match lower.as_str() {
        "coalesce" => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
        "timestamp" => {
            arity(0)?;
            Ok(Value::Int(chrono::Utc::now().timestamp_millis()))
        }
        _ => {
            arity(1)?;
            let arg = args.into_iter().next().unwrap_or(Value::Null);
            if arg.is_null() {
                return if matches!(lower.as_str(), "id" | "elementid" | "labels" | "type" | "keys" | "properties" | "size" | "tostring" | "tointeger" | "toupper" | "tolower") {
                    Ok(Value::Null)
                } else {
                    Err(Error::SemanticError(format!("Unknown function '{name}'")))
                };
            }
            unary_function(name, &lower, arg)
        }
    }
}

fn unary_function(name: &str, lower: &str, arg: Value) -> Result<Value> {
    match (lower, arg) {
        ("id", Value::Node(n)) => Ok(Value::Int(n.id.0 as i64)),
        ("id", Value::Relationship(r)) => Ok(Value::Int(r.id.0 as i64)),
        ("elementid", Value::Node(n)) => Ok(Value::String(format!("node:{}", n.id))),
        ("elementid", Value::Relationship(r)) => Ok(Value::String(format!("relationship:{}", r.id))),
        ("labels", Value::Node(n)) => Ok(Value::from(n.labels.clone())),
        ("type", Value::Relationship(r)) => Ok(Value::String(r.rel_type.clone())),
        ("keys", v @ (Value::Node(_) | Value::Relationship(_) | Value::Map(_))) => {
            let mut keys: Vec<String> = entity_properties(&v).into_keys().collect();
            keys.sort();
            Ok(Value::from(keys))
        }
        ("properties", v @ (Value::Node(_) | Value::Relationship(_) | Value::Map(_))) => {
            Ok(Value::Map(entity_properties(&v)))
        }
        ("size", Value::List(items)) => Ok(Value::Int(items.len() as i64)),
        ("size", Value::String(s)) => Ok(Value::Int(s.chars().count() as i64)),
        ("tostring", v @ (Value::String(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_))) => {
            Ok(Value::String(display_plain(&v)))
        }
        ("tostring", v @ (Value::Date(_) | Value::DateTime(_) | Value::LocalDateTime(_))) => {
            Ok(Value::String(match v.to_json() {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }))
        }
        ("tointeger", Value::Int(i)) => Ok(Value::Int(i)),
        ("tointeger", Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
        ("tointeger", Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
        ("tointeger", Value::String(s)) => {
            let s = s.trim();
            Ok(s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .map_or(Value::Null, Value::Int))
        }
        ("toupper", Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        ("tolower", Value::String(s)) => Ok(Value::String(s.to_lowercase())),
        (
            "id" | "elementid" | "labels" | "type" | "keys" | "properties" | "size" | "tostring"
            | "tointeger" | "toupper" | "tolower",
            other,
        ) => Err(Error::TypeError {
            expected: format!("valid argument for {name}()"),
            got: other.type_name().into(),
        }),
        _ => Err(Error::SemanticError(format!("Unknown function '{name}'"))),
    }
}

fn entity_properties(v: &Value) -> PropertyMap {
    match v {
        Value::Node(n) => n.properties.clone(),
        Value::Relationship(r) => r.properties.clone(),
        Value::Map(m) => m.clone(),
        _ => PropertyMap::new(),
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Compute one aggregate over the rows of a group.
pub fn aggregate(ev: &Evaluator, name: &str, args: &[Expr], distinct: bool, rows: &[Row]) -> Result<Value> {
    let lower = name.to_ascii_lowercase();

    // count(*)
    if args.is_empty() {
        return if lower == "count" {
            Ok(Value::Int(rows.len() as i64))
        } else {
            Err(Error::SemanticError(format!("{name}() expects 1 argument")))
        };
    }
    if args.len() != 1 {
        return Err(Error::SemanticError(format!("{name}() expects 1 argument, got {}", args.len())));
    }

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let v = ev.eval(&args[0], row)?;
        if v.is_null() {
            continue;
        }
        if distinct && values.iter().any(|seen: &Value| seen.order_cmp(&v) == Ordering::Equal) {
            continue;
        }
        values.push(v);
    }

    match lower.as_str() {
        "count" => Ok(Value::Int(values.len() as i64)),
        "collect" => Ok(Value::List(values)),
        "sum" => {
            let mut int_sum: i64 = 0;
            let mut float_sum: Option<f64> = None;
            for v in &values {
                match v {
                    Value::Int(i) => match float_sum.as_mut() {
                        Some(f) => *f += *i as f64,
                        None => {
                            int_sum = int_sum
                                .checked_add(*i)
                                .ok_or_else(|| Error::ExecutionError("integer overflow in sum()".into()))?;
                        }
                    },
                    Value::Float(x) => {
                        *float_sum.get_or_insert(int_sum as f64) += x;
                    }
                    other => return Err(type_error("Number", other)),
                }
            }
            Ok(float_sum.map_or(Value::Int(int_sum), Value::Float))
        }
        "avg" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut total = 0.0;
            for v in &values {
                total += v.as_float().filter(|_| v.is_numeric()).ok_or_else(|| type_error("Number", v))?;
            }
            Ok(Value::Float(total / values.len() as f64))
        }
        "min" => Ok(values.into_iter().min_by(|a, b| a.order_cmp(b)).unwrap_or(Value::Null)),
        "max" => Ok(values.into_iter().max_by(|a, b| a.order_cmp(b)).unwrap_or(Value::Null)),
        _ => Err(Error::SemanticError(format!("Unknown aggregate '{name}'"))),
    }
}
