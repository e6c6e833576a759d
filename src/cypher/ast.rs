//! Syntax tree of the Cypher subset the in-memory engine runs.
//!
//! A query is a pipeline: each clause turns the rows produced so far into
//! new rows, and `RETURN`, when present, closes the pipeline.

use std::fmt;

use crate::Result;
use crate::model::{Direction, Value};

#[derive(Debug, Clone)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    /// Whether running the query may change the graph.
    pub fn mutates(&self) -> bool {
        self.clauses.iter().any(Clause::mutates)
    }
}

#[derive(Debug, Clone)]
pub enum Clause {
    Match {
        optional: bool,
        patterns: Vec<Pattern>,
        filter: Option<Expr>,
    },
    Create(Vec<Pattern>),
    Merge {
        pattern: Pattern,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    },
    Set(Vec<SetItem>),
    Remove(Vec<RemoveItem>),
    Delete {
        detach: bool,
        targets: Vec<Expr>,
    },
    Return(Projection),
}

impl Clause {
    pub fn mutates(&self) -> bool {
        !matches!(self, Clause::Match { .. } | Clause::Return(_))
    }
}

/// `(a:Person)-[:KNOWS]->(b)`: a start node followed by zero or more hops.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub start: NodePattern,
    pub hops: Vec<Hop>,
}

impl Pattern {
    /// Variables the pattern names, in source order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.start.var.as_deref())
            .chain(self.hops.iter().flat_map(|hop| [hop.rel.var.as_deref(), hop.node.var.as_deref()]))
            .flatten()
    }
}

/// One relationship of a path pattern and the node it leads to.
#[derive(Debug, Clone)]
pub struct Hop {
    pub rel: RelPattern,
    pub node: NodePattern,
}

#[derive(Debug, Clone)]
pub struct NodePattern {
    pub var: Option<String>,
    pub labels: Vec<String>,
    /// Map literal or a parameter expected to hold a map.
    pub props: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct RelPattern {
    pub var: Option<String>,
    /// Alternatives; empty matches any type.
    pub types: Vec<String>,
    /// Seen from the node on the left of the hop.
    pub direction: Direction,
    pub props: Option<Expr>,
}

/// The body of `RETURN`.
#[derive(Debug, Clone)]
pub struct Projection {
    pub distinct: bool,
    /// `RETURN *`: every bound variable, `items` is empty.
    pub star: bool,
    pub items: Vec<Projected>,
    pub order_by: Vec<SortKey>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct Projected {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Projected {
    /// Column name: the alias, otherwise the expression as written.
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expr.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub enum SetItem {
    /// `n.key = value`
    Property { var: String, key: String, value: Expr },
    /// `n = map` replaces every property, `n += map` merges into them.
    Properties { var: String, value: Expr, merge: bool },
    /// `n:Label`
    Label { var: String, label: String },
}

#[derive(Debug, Clone)]
pub enum RemoveItem {
    Property { var: String, key: String },
    Label { var: String, label: String },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const(Value),
    Var(String),
    Param(String),
    Prop(Box<Expr>, String),
    /// `count(*)` is a `count` call without arguments.
    Call { func: String, distinct: bool, args: Vec<Expr> },
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    /// `IS NULL`, or `IS NOT NULL` when the flag is set.
    IsNull(Box<Expr>, bool),
    HasLabel(Box<Expr>, String),
    List(Vec<Expr>),
    /// Entries in source order.
    Map(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    StartsWith,
    EndsWith,
    Contains,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "OR",
            BinOp::Xor => "XOR",
            BinOp::And => "AND",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "IN",
            BinOp::StartsWith => "STARTS WITH",
            BinOp::EndsWith => "ENDS WITH",
            BinOp::Contains => "CONTAINS",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
        }
    }
}

impl Expr {
    pub fn binary(lhs: Expr, op: BinOp, rhs: Expr) -> Self {
        Expr::Binary(Box::new(lhs), op, Box::new(rhs))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary(op, Box::new(operand))
    }

    /// Direct subexpressions, left to right.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::Param(_) => Vec::new(),
            Expr::Prop(inner, _) | Expr::Unary(_, inner) | Expr::IsNull(inner, _) | Expr::HasLabel(inner, _) => {
                vec![inner.as_ref()]
            }
            Expr::Binary(lhs, _, rhs) => vec![lhs.as_ref(), rhs.as_ref()],
            Expr::Call { args: items, .. } | Expr::List(items) => items.iter().collect(),
            Expr::Map(entries) => entries.iter().map(|(_, e)| e).collect(),
        }
    }

    /// Rebuild this node with every direct subexpression replaced by `f`'s
    /// output. Children are visited left to right.
    pub fn try_map_children(&self, mut f: impl FnMut(&Expr) -> Result<Expr>) -> Result<Expr> {
        Ok(match self {
            Expr::Const(_) | Expr::Var(_) | Expr::Param(_) => self.clone(),
            Expr::Prop(inner, key) => Expr::Prop(Box::new(f(inner.as_ref())?), key.clone()),
            Expr::Unary(op, inner) => Expr::unary(*op, f(inner.as_ref())?),
            Expr::IsNull(inner, negated) => Expr::IsNull(Box::new(f(inner.as_ref())?), *negated),
            Expr::HasLabel(inner, label) => Expr::HasLabel(Box::new(f(inner.as_ref())?), label.clone()),
            Expr::Binary(lhs, op, rhs) => {
                let lhs = f(lhs.as_ref())?;
                Expr::binary(lhs, *op, f(rhs.as_ref())?)
            }
            Expr::Call { func, distinct, args } => Expr::Call {
                func: func.clone(),
                distinct: *distinct,
                args: args.iter().map(&mut f).collect::<Result<_>>()?,
            },
            Expr::List(items) => Expr::List(items.iter().map(&mut f).collect::<Result<_>>()?),
            Expr::Map(entries) => Expr::Map(
                entries
                    .iter()
                    .map(|(key, e)| Ok((key.clone(), f(e)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: impl IntoIterator<Item = T>) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// Renders the expression the way it is written; unaliased RETURN columns
// are named after this text.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(Value::String(s)) => write!(f, "'{s}'"),
            Expr::Const(value) => write!(f, "{value}"),
            Expr::Var(name) => f.write_str(name),
            Expr::Param(name) => write!(f, "${name}"),
            Expr::Prop(base, key) => write!(f, "{base}.{key}"),
            Expr::Call { func, distinct, args } => {
                write!(f, "{func}(")?;
                if *distinct {
                    f.write_str("DISTINCT ")?;
                }
                if args.is_empty() && func.eq_ignore_ascii_case("count") {
                    f.write_str("*")?;
                }
                write_joined(f, args)?;
                f.write_str(")")
            }
            Expr::Unary(UnaryOp::Not, operand) => write!(f, "NOT {operand}"),
            Expr::Unary(UnaryOp::Neg, operand) => write!(f, "-{operand}"),
            Expr::Binary(lhs, op, rhs) => write!(f, "{lhs} {op} {rhs}"),
            Expr::IsNull(operand, false) => write!(f, "{operand} IS NULL"),
            Expr::IsNull(operand, true) => write!(f, "{operand} IS NOT NULL"),
            Expr::HasLabel(operand, label) => write!(f, "{operand}:{label}"),
            Expr::List(items) => {
                f.write_str("[")?;
                write_joined(f, items)?;
                f.write_str("]")
            }
            Expr::Map(entries) => {
                f.write_str("{")?;
                write_joined(f, entries.iter().map(|(key, e)| format!("{key}: {e}")))?;
                f.write_str("}")
            }
        }
    }
}
