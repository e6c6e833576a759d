//! Property and result values.
//!
//! [`Value`] is what parameters, properties and record columns hold. The
//! JSON bridge at the bottom is how entity structs get in and out: serde
//! turns an entity into JSON, and JSON is converted to and from `Value`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Node, Relationship};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Node(Box<Node>),
    Relationship(Box<Relationship>),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    LocalDateTime(NaiveDateTime),
}

impl Value {
    /// Cypher type name, as used in type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Node(_) => "NODE",
            Value::Relationship(_) => "RELATIONSHIP",
            Value::Date(_) => "DATE",
            Value::DateTime(_) => "DATETIME",
            Value::LocalDateTime(_) => "LOCAL_DATETIME",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Whether this can be stored as a node or relationship property:
    /// a scalar, or a flat list of scalars.
    pub fn is_storable(&self) -> bool {
        match self {
            Value::List(items) => items.iter().all(Value::is_scalar),
            other => other.is_scalar(),
        }
    }

    fn is_scalar(&self) -> bool {
        !matches!(
            self,
            Value::List(_) | Value::Map(_) | Value::Node(_) | Value::Relationship(_)
        )
    }

    /// Integers, and floats without a fractional part.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            Value::Float(f) if f.fract() == 0.0 => Some(f as i64),
            _ => None,
        }
    }

    /// Any number, widened to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(s) = self { Some(s) } else { None }
    }

    pub fn as_node(&self) -> Option<&Node> {
        if let Value::Node(n) = self { Some(n) } else { None }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        if let Value::Relationship(r) = self { Some(r) } else { None }
    }
}

macro_rules! value_from {
    ($($source:ty => |$v:ident| $build:expr;)*) => {
        $(impl From<$source> for Value {
            fn from($v: $source) -> Self {
                $build
            }
        })*
    };
}

value_from! {
    bool => |v| Value::Bool(v);
    i32 => |v| Value::Int(i64::from(v));
    u32 => |v| Value::Int(i64::from(v));
    i64 => |v| Value::Int(v);
    f64 => |v| Value::Float(v);
    String => |v| Value::String(v);
    &str => |v| Value::String(v.to_owned());
    &String => |v| Value::String(v.clone());
    Node => |v| Value::Node(Box::new(v));
    Relationship => |v| Value::Relationship(Box::new(v));
    NaiveDate => |v| Value::Date(v);
    NaiveDateTime => |v| Value::LocalDateTime(v);
    DateTime<Utc> => |v| Value::DateTime(v);
    HashMap<String, Value> => |v| Value::Map(v);
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Integers must fit in `i64`; a larger unsigned number is a
/// `Error::Mapping` rather than a silently rounded float.
impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match (n.as_i64(), n.is_u64()) {
                (Some(i), _) => Value::Int(i),
                (None, true) => {
                    return Err(Error::Mapping(format!(
                        "integer {n} does not fit in a 64-bit signed property"
                    )));
                }
                (None, false) => n.as_f64().map_or(Value::Null, Value::Float),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::try_from).collect::<Result<_>>()?),
            Json::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

impl Value {
    /// Convert into plain JSON.
    ///
    /// Nodes and relationships become the JSON object of their properties, so
    /// a returned `n` column deserializes straight into an entity struct.
    /// Temporal values become ISO-8601 strings, which is what chrono's serde
    /// impls expect on the way back in.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(bytes) => bytes.iter().copied().collect(),
            Value::List(items) => items.iter().map(Value::to_json).collect(),
            Value::Map(map) => properties_to_json(map),
            Value::Node(n) => properties_to_json(&n.properties),
            Value::Relationship(r) => properties_to_json(&r.properties),
            Value::Date(d) => Json::String(d.to_string()),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339()),
            Value::LocalDateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }
}

fn properties_to_json(map: &HashMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => fmt::Display::fmt(b, f),
            Value::Int(i) => fmt::Display::fmt(i, f),
            Value::Float(x) => fmt::Display::fmt(x, f),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::List(items) => {
                let shown: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", shown.join(", "))
            }
            Value::Map(map) => {
                let mut shown: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                shown.sort();
                write!(f, "{{{}}}", shown.join(", "))
            }
            Value::Node(n) => write!(f, "({}:{})", n.id, n.labels.join(":")),
            Value::Relationship(r) => write!(f, "({})-[{}:{}]->({})", r.start_node, r.id, r.rel_type, r.end_node),
            Value::Date(d) => fmt::Display::fmt(d, f),
            Value::DateTime(dt) => fmt::Display::fmt(dt, f),
            Value::LocalDateTime(dt) => fmt::Display::fmt(dt, f),
        }
    }
}

/// Element-wise equality under three-valued logic: one `Some(false)`
/// decides, otherwise any NULL comparison makes the whole answer NULL.
fn all_equal<'a>(pairs: impl Iterator<Item = (&'a Value, &'a Value)>) -> Option<bool> {
    let mut unknown = false;
    for (x, y) in pairs {
        match x.cypher_eq(y) {
            Some(false) => return Some(false),
            None => unknown = true,
            Some(true) => {}
        }
    }
    (!unknown).then_some(true)
}

impl Value {
    /// Cypher ordering comparison (`<`, `>=` ...). `None` when either side
    /// is NULL or the types are not comparable.
    pub fn cypher_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_float()?.partial_cmp(&b.as_float()?),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::LocalDateTime(a), Value::LocalDateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Cypher `=`: `None` when the answer is NULL, which includes a NULL
    /// nested inside otherwise equal lists or maps.
    pub fn cypher_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (a, b) if a.is_numeric() && b.is_numeric() => Some(a.cypher_cmp(b) == Some(Ordering::Equal)),
            (Value::List(a), Value::List(b)) if a.len() == b.len() => all_equal(a.iter().zip(b)),
            (Value::Map(a), Value::Map(b)) if a.len() == b.len() => {
                let mut pairs = Vec::with_capacity(a.len());
                for (key, x) in a {
                    match b.get(key) {
                        Some(y) => pairs.push((x, y)),
                        None => return Some(false),
                    }
                }
                all_equal(pairs.into_iter())
            }
            (Value::Node(a), Value::Node(b)) => Some(a.id == b.id),
            (Value::Relationship(a), Value::Relationship(b)) => Some(a.id == b.id),
            (a, b) => Some(a == b),
        }
    }

    /// Total ordering used by ORDER BY: values of different types sort by
    /// type rank, NULL sorts last in ascending order.
    pub fn order_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Node(a), Value::Node(b)) => a.id.cmp(&b.id),
            (Value::Relationship(a), Value::Relationship(b)) => a.id.cmp(&b.id),
            (Value::List(a), Value::List(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.order_cmp(y))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => self
                .cypher_cmp(other)
                .unwrap_or_else(|| self.sort_rank().cmp(&other.sort_rank())),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Value::Map(_) => 0,
            Value::Node(_) => 1,
            Value::Relationship(_) => 2,
            Value::List(_) => 3,
            Value::String(_) => 4,
            Value::Bool(_) => 5,
            Value::Int(_) | Value::Float(_) => 6,
            Value::Date(_) => 7,
            Value::LocalDateTime(_) => 8,
            Value::DateTime(_) => 9,
            Value::Bytes(_) => 10,
            Value::Null => 11,
        }
    }
}

/// Typed read of a record column.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

fn expected(what: &str, val: &Value) -> Error {
    Error::TypeError {
        expected: what.into(),
        got: val.type_name().into(),
    }
}

macro_rules! from_variant {
    ($($target:ty: $variant:ident($inner:ident) => $out:expr, $what:literal;)*) => {
        $(impl FromValue for $target {
            fn from_value(val: &Value) -> Result<Self> {
                match val {
                    Value::$variant($inner) => Ok($out),
                    other => Err(expected($what, other)),
                }
            }
        })*
    };
}

from_variant! {
    String: String(s) => s.clone(), "String";
    bool: Bool(b) => *b, "Boolean";
    Node: Node(n) => n.as_ref().clone(), "Node";
    Relationship: Relationship(r) => r.as_ref().clone(), "Relationship";
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| expected("Integer", val))
    }
}

impl FromValue for u64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| expected("non-negative Integer", val))
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_float().ok_or_else(|| expected("Float", val))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(val: &Value) -> Result<Self> {
        if val.is_null() { Ok(None) } else { T::from_value(val).map(Some) }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            other => Err(expected("List", other)),
        }
    }
}
