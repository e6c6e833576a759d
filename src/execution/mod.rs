//! Query execution engine.
//!
//! Executes a parsed statement against a `MemoryGraph`. Clauses run in
//! order, each one turning the rows produced so far into new rows:
//!
//! | Clause | Effect on rows |
//! |--------|----------------|
//! | MATCH | every input row × every match (OPTIONAL keeps unmatched rows, binding NULL) |
//! | CREATE / MERGE | binds the created or merged elements |
//! | SET / REMOVE / DELETE | unchanged (graph mutated) |
//! | RETURN | projection, aggregation, DISTINCT, ORDER BY, SKIP, LIMIT |
//!
//! The graph is mutated in place. Callers that need atomicity run the
//! statement against a working copy (see `storage::Database::apply`).

pub mod eval;
pub mod pattern;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::MemoryGraph;
use crate::{Error, Result};

use eval::{Evaluator, Row, contains_aggregate, is_aggregate, type_error};

/// Query execution result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub stats: ExecutionStats,
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub execution_time_ms: u64,
}

impl ExecutionStats {
    /// True if the statement changed the graph.
    pub fn contains_updates(&self) -> bool {
        self.nodes_created
            + self.nodes_deleted
            + self.relationships_created
            + self.relationships_deleted
            + self.properties_set
            + self.labels_added
            + self.labels_removed
            > 0
    }
}

/// Execute a statement against a graph.
pub fn execute(graph: &mut MemoryGraph, query: &Query, params: &PropertyMap) -> Result<QueryResult> {
    let start = Instant::now();
    let mut exec = Executor {
        graph,
        params,
        stats: ExecutionStats::default(),
    };

    let mut rows = vec![Row::new()];
    let mut output = None;
    for clause in &query.clauses {
        match clause {
            Clause::Match { optional, patterns, filter } => {
                rows = exec.match_clause(*optional, patterns, filter.as_ref(), rows)?;
            }
            Clause::Create(patterns) => rows = exec.create_clause(patterns, rows)?,
            Clause::Merge { pattern, on_create, on_match } => {
                rows = exec.merge_clause(pattern, on_create, on_match, rows)?;
            }
            Clause::Set(items) => exec.set_clause(items, &rows)?,
            Clause::Remove(items) => exec.remove_clause(items, &rows)?,
            Clause::Delete { detach, targets } => exec.delete_clause(*detach, targets, &rows)?,
            Clause::Return(projection) => {
                output = Some(exec.return_clause(projection, std::mem::take(&mut rows))?);
            }
        }
    }

    let (columns, rows) = output.unwrap_or_default();
    let mut stats = exec.stats;
    stats.execution_time_ms = start.elapsed().as_millis() as u64;
    Ok(QueryResult { columns, rows, stats })
}

struct Executor<'a> {
    graph: &'a mut MemoryGraph,
    params: &'a PropertyMap,
    stats: ExecutionStats,
}

enum Target {
    Node(NodeId),
    Relationship(RelId),
    Null,
}

impl Executor<'_> {
    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&*self.graph, self.params)
    }

    fn target(&self, variable: &str, row: &Row) -> Result<Target> {
        match row.get(variable) {
            Some(Value::Node(n)) => Ok(Target::Node(n.id)),
            Some(Value::Relationship(r)) => Ok(Target::Relationship(r.id)),
            Some(Value::Null) => Ok(Target::Null),
            Some(other) => Err(type_error("Node or Relationship", other)),
            None => Err(Error::SemanticError(format!("Variable `{variable}` not defined"))),
        }
    }

    // ========================================================================
    // MATCH
    // ========================================================================

    fn match_clause(
        &mut self,
        optional: bool,
        patterns: &[Pattern],
        filter: Option<&Expr>,
        rows: Vec<Row>,
    ) -> Result<Vec<Row>> {
        let ev = self.evaluator();
        let mut out = Vec::new();
        for row in rows {
            let mut matched = Vec::new();
            for candidate in pattern::match_patterns(&ev, patterns, &row)? {
                let keep = match filter {
                    Some(pred) => ev.eval_predicate(pred, &candidate)?,
                    None => true,
                };
                if keep {
                    matched.push(candidate);
                }
            }

            if matched.is_empty() && optional {
                let mut row = row;
                for p in patterns {
                    for var in p.variables() {
                        row.entry(var.to_string()).or_insert(Value::Null);
                    }
                }
                out.push(row);
            } else {
                out.extend(matched);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // CREATE / MERGE
    // ========================================================================

    fn create_clause(&mut self, patterns: &[Pattern], rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut out = Vec::with_capacity(rows.len());
        for mut row in rows {
            for p in patterns {
                pattern::create_pattern(self.graph, self.params, p, &mut row, &mut self.stats)?;
            }
            out.push(row);
        }
        Ok(out)
    }

    fn merge_clause(
        &mut self,
        merged: &Pattern,
        on_create: &[SetItem],
        on_match: &[SetItem],
        rows: Vec<Row>,
    ) -> Result<Vec<Row>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let matched = {
                let ev = self.evaluator();
                pattern::match_patterns(&ev, std::slice::from_ref(merged), &row)?
            };

            if matched.is_empty() {
                let mut row = row;
                pattern::create_pattern(self.graph, self.params, merged, &mut row, &mut self.stats)?;
                self.set_clause(on_create, std::slice::from_ref(&row))?;
                out.push(row);
            } else {
                self.set_clause(on_match, &matched)?;
                out.extend(matched);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // SET / REMOVE / DELETE
    // ========================================================================

    fn set_clause(&mut self, items: &[SetItem], rows: &[Row]) -> Result<()> {
        for row in rows {
            for item in items {
                self.set_item(item, row)?;
            }
        }
        Ok(())
    }

    fn set_item(&mut self, item: &SetItem, row: &Row) -> Result<()> {
        match item {
            SetItem::Property { var, key, value } => {
                let value = self.evaluator().eval(value, row)?;
                match self.target(var, row)? {
                    Target::Node(id) => self.graph.set_node_property(id, key, value)?,
                    Target::Relationship(id) => self.graph.set_relationship_property(id, key, value)?,
                    Target::Null => return Ok(()),
                }
                self.stats.properties_set += 1;
            }
            SetItem::Properties { var, value, merge } => {
                let props = match self.evaluator().eval(value, row)? {
                    Value::Map(m) => m,
                    Value::Node(n) => n.properties,
                    Value::Relationship(r) => r.properties,
                    Value::Null => PropertyMap::new(),
                    other => return Err(type_error("Map", &other)),
                };
                let count = props.len() as u64;
                match (self.target(var, row)?, !merge) {
                    (Target::Null, _) => return Ok(()),
                    (Target::Node(id), true) => self.graph.replace_node_properties(id, props)?,
                    (Target::Relationship(id), true) => self.graph.replace_relationship_properties(id, props)?,
                    (Target::Node(id), false) => {
                        for (k, v) in props {
                            self.graph.set_node_property(id, &k, v)?;
                        }
                    }
                    (Target::Relationship(id), false) => {
                        for (k, v) in props {
                            self.graph.set_relationship_property(id, &k, v)?;
                        }
                    }
                }
                self.stats.properties_set += count;
            }
            SetItem::Label { var, label } => match self.target(var, row)? {
                Target::Node(id) => {
                    if self.graph.add_label(id, label)? {
                        self.stats.labels_added += 1;
                    }
                }
                Target::Null => {}
                Target::Relationship(_) => {
                    return Err(Error::TypeError {
                        expected: "Node".into(),
                        got: "RELATIONSHIP".into(),
                    });
                }
            },
        }
        Ok(())
    }

    fn remove_clause(&mut self, items: &[RemoveItem], rows: &[Row]) -> Result<()> {
        for row in rows {
            for item in items {
                match item {
                    RemoveItem::Property { var, key } => match self.target(var, row)? {
                        Target::Node(id) => self.graph.remove_node_property(id, key)?,
                        Target::Relationship(id) => self.graph.remove_relationship_property(id, key)?,
                        Target::Null => {}
                    },
                    RemoveItem::Label { var, label } => match self.target(var, row)? {
                        Target::Node(id) => {
                            if self.graph.remove_label(id, label)? {
                                self.stats.labels_removed += 1;
                            }
                        }
                        Target::Null => {}
                        Target::Relationship(_) => {
                            return Err(Error::TypeError {
                                expected: "Node".into(),
                                got: "RELATIONSHIP".into(),
                            });
                        }
                    },
                }
            }
        }
        Ok(())
    }

    fn delete_clause(&mut self, detach: bool, targets: &[Expr], rows: &[Row]) -> Result<()> {
        let mut nodes = BTreeSet::new();
        let mut rels = BTreeSet::new();
        {
            let ev = self.evaluator();
            for row in rows {
                for expr in targets {
                    match ev.eval(expr, row)? {
                        Value::Node(n) => { nodes.insert(n.id); }
                        Value::Relationship(r) => { rels.insert(r.id); }
                        Value::Null => {}
                        other => return Err(type_error("Node or Relationship", &other)),
                    }
                }
            }
        }

        // Relationships first, so `DELETE r, a, b` works without DETACH.
        for id in rels {
            if self.graph.delete_relationship(id) {
                self.stats.relationships_deleted += 1;
            }
        }
        for id in nodes {
            if detach {
                let attached = self.graph.relationships_of(id, Direction::Both, None).len() as u64;
                if self.graph.detach_delete_node(id)? {
                    self.stats.nodes_deleted += 1;
                    self.stats.relationships_deleted += attached;
                }
            } else if self.graph.delete_node(id)? {
                self.stats.nodes_deleted += 1;
            }
        }
        Ok(())
    }

    // ========================================================================
    // RETURN
    // ========================================================================

    fn return_clause(&self, r: &Projection, rows: Vec<Row>) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let ev = self.evaluator();

        let items: Vec<Projected> = if r.star {
            let vars: Vec<String> = rows.first().map(|row| row.keys().cloned().collect()).unwrap_or_default();
            if vars.is_empty() && rows.first().is_some() {
                return Err(Error::SemanticError(
                    "RETURN * is not allowed when there are no variables in scope".into(),
                ));
            }
            vars.into_iter()
                .map(|v| Projected { expr: Expr::Var(v), alias: None })
                .collect()
        } else {
            r.items.clone()
        };
        let columns: Vec<String> = items.iter().map(Projected::name).collect();

        // (projected values, row used to evaluate ORDER BY)
        let mut projected: Vec<(Vec<Value>, Row)> = if items.iter().any(|i| contains_aggregate(&i.expr)) {
            aggregate_rows(&ev, &items, &columns, rows)?
        } else {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let values = items
                    .iter()
                    .map(|i| ev.eval(&i.expr, &row))
                    .collect::<Result<Vec<_>>>()?;
                let order_row = with_columns(row, &columns, &values);
                out.push((values, order_row));
            }
            out
        };

        if r.distinct {
            let mut unique: Vec<(Vec<Value>, Row)> = Vec::with_capacity(projected.len());
            for entry in projected {
                if !unique.iter().any(|(seen, _)| same_values(seen, &entry.0)) {
                    unique.push(entry);
                }
            }
            projected = unique;
        }

        if !r.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(projected.len());
            for (values, order_row) in projected {
                let keys = r
                    .order_by
                    .iter()
                    .map(|o| match columns.iter().position(|c| *c == o.expr.to_string()) {
                        Some(idx) => Ok(values[idx].clone()),
                        None => ev.eval(&o.expr, &order_row),
                    })
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, values, order_row));
            }
            keyed.sort_by(|a, b| {
                for (idx, o) in r.order_by.iter().enumerate() {
                    let ord = a.0[idx].order_cmp(&b.0[idx]);
                    let ord = if o.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            projected = keyed.into_iter().map(|(_, v, row)| (v, row)).collect();
        }

        let skip = self.paging_value(&ev, r.skip.as_ref(), "SKIP")?.unwrap_or(0);
        let limit = self.paging_value(&ev, r.limit.as_ref(), "LIMIT")?.unwrap_or(usize::MAX);
        let rows = projected
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(values, _)| values)
            .collect();

        Ok((columns, rows))
    }

    fn paging_value(&self, ev: &Evaluator, expr: Option<&Expr>, clause: &str) -> Result<Option<usize>> {
        let Some(expr) = expr else { return Ok(None) };
        match ev.eval(expr, &Row::new())? {
            Value::Int(n) if n >= 0 => Ok(Some(n as usize)),
            other => Err(Error::SemanticError(format!(
                "{clause} expects a non-negative integer, got {other}"
            ))),
        }
    }
}

/// Grouped projection: non-aggregate items form the grouping key.
fn aggregate_rows(
    ev: &Evaluator,
    items: &[Projected],
    columns: &[String],
    rows: Vec<Row>,
) -> Result<Vec<(Vec<Value>, Row)>> {
    let key_items: Vec<usize> = (0..items.len())
        .filter(|&i| !contains_aggregate(&items[i].expr))
        .collect();

    let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    for row in rows {
        let key = key_items
            .iter()
            .map(|&i| ev.eval(&items[i].expr, &row))
            .collect::<Result<Vec<_>>>()?;
        match groups.iter_mut().find(|(k, _)| same_values(k, &key)) {
            Some((_, members)) => members.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    // No grouping keys: aggregates over an empty input still yield one row.
    if groups.is_empty() && key_items.is_empty() {
        groups.push((Vec::new(), Vec::new()));
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let base = members.first().cloned().unwrap_or_default();
        let mut values = Vec::with_capacity(items.len());
        let mut key_values = key.into_iter();
        for item in items {
            if contains_aggregate(&item.expr) {
                values.push(eval_with_aggregates(ev, &item.expr, &members, &base)?);
            } else {
                values.push(key_values.next().unwrap_or(Value::Null));
            }
        }
        let order_row = with_columns(base, columns, &values);
        out.push((values, order_row));
    }
    Ok(out)
}

/// Evaluate an expression whose aggregate calls are computed over `members`.
fn eval_with_aggregates(ev: &Evaluator, expr: &Expr, members: &[Row], base: &Row) -> Result<Value> {
    let mut computed = Vec::new();
    let rewritten = rewrite_aggregates(ev, expr, members, &mut computed)?;
    let mut row = base.clone();
    for (idx, value) in computed.into_iter().enumerate() {
        row.insert(format!("  agg{idx}"), value);
    }
    ev.eval(&rewritten, &row)
}

fn rewrite_aggregates(ev: &Evaluator, expr: &Expr, members: &[Row], computed: &mut Vec<Value>) -> Result<Expr> {
    match expr {
        Expr::Call { func, args, distinct } if is_aggregate(func) => {
            if args.iter().any(contains_aggregate) {
                return Err(Error::SemanticError(format!(
                    "Nested aggregation in {func}() is not allowed"
                )));
            }
            computed.push(eval::aggregate(ev, func, args, *distinct, members)?);
            Ok(Expr::Var(format!("  agg{}", computed.len() - 1)))
        }
        other => other.try_map_children(|child| rewrite_aggregates(ev, child, members, computed)),
    }
}

/// Source row extended with the projected columns, so ORDER BY can refer to
/// aliases as well as to variables of the source row.
fn with_columns(mut row: Row, columns: &[String], values: &[Value]) -> Row {
    for (c, v) in columns.iter().zip(values) {
        row.insert(c.clone(), v.clone());
    }
    row
}

fn same_values(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.order_cmp(y) == Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::parse;
    use crate::params;
    use pretty_assertions::assert_eq;

    fn run(graph: &mut MemoryGraph, query: &str, params: &PropertyMap) -> QueryResult {
        let query = parse(query).unwrap();
        execute(graph, &query, params).unwrap()
    }

    fn seed() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        run(
            &mut g,
            "CREATE (a:Person {name: 'Ada', age: 36})-[:KNOWS {since: 1840}]->(b:Person {name: 'Charles', age: 48}), \
             (c:Person {name: 'Grace', age: 85})",
            &PropertyMap::new(),
        );
        g
    }

    #[test]
    fn test_create_stats() {
        let g = seed();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.relationship_count(), 1);

        let mut g = MemoryGraph::new();
        let result = run(&mut g, "CREATE (n:Movie $props)", &params! {
            "props" => Value::Map(params! { "title" => "Alien", "year" => 1979 })
        });
        assert_eq!(result.stats.nodes_created, 1);
        assert_eq!(result.stats.properties_set, 2);
        assert_eq!(result.stats.labels_added, 1);
        assert!(result.stats.contains_updates());
        assert!(result.columns.is_empty());
    }

    #[test]
    fn test_match_where_order() {
        let mut g = seed();
        let result = run(&mut g, "MATCH (p:Person) WHERE p.age > 40 RETURN p.name AS name ORDER BY p.age DESC", &PropertyMap::new());
        assert_eq!(result.columns, vec!["name"]);
        assert_eq!(result.rows, vec![vec![Value::from("Grace")], vec![Value::from("Charles")]]);
        assert!(!result.stats.contains_updates());
    }

    #[test]
    fn test_relationship_traversal_both_directions() {
        let mut g = seed();
        let out = run(&mut g, "MATCH (a)-[r:KNOWS]->(b) RETURN a.name, r.since, b.name", &PropertyMap::new());
        assert_eq!(out.rows, vec![vec![Value::from("Ada"), Value::Int(1840), Value::from("Charles")]]);

        let both = run(&mut g, "MATCH (a)-[:KNOWS]-(b) RETURN a.name ORDER BY a.name", &PropertyMap::new());
        assert_eq!(both.rows, vec![vec![Value::from("Ada")], vec![Value::from("Charles")]]);
    }

    #[test]
    fn test_optional_match_binds_null() {
        let mut g = seed();
        let result = run(
            &mut g,
            "MATCH (p:Person) OPTIONAL MATCH (p)-[:KNOWS]->(f) RETURN p.name, f.name ORDER BY p.name",
            &PropertyMap::new(),
        );
        assert_eq!(result.rows, vec![
            vec![Value::from("Ada"), Value::from("Charles")],
            vec![Value::from("Charles"), Value::Null],
            vec![Value::from("Grace"), Value::Null],
        ]);
    }

    #[test]
    fn test_aggregation() {
        let mut g = seed();
        let result = run(&mut g, "MATCH (p:Person) RETURN count(*) AS n, sum(p.age) AS total, avg(p.age) AS mean, min(p.name), max(p.age)", &PropertyMap::new());
        assert_eq!(result.rows, vec![vec![
            Value::Int(3),
            Value::Int(169),
            Value::Float(169.0 / 3.0),
            Value::from("Ada"),
            Value::Int(85),
        ]]);

        let empty = run(&mut g, "MATCH (m:Missing) RETURN count(m) AS n, collect(m.name) AS names", &PropertyMap::new());
        assert_eq!(empty.rows, vec![vec![Value::Int(0), Value::List(vec![])]]);

        let grouped = run(&mut g, "MATCH (p:Person) OPTIONAL MATCH (p)-[:KNOWS]->(f) RETURN f IS NULL AS lonely, count(p) + 0 AS n ORDER BY n", &PropertyMap::new());
        assert_eq!(grouped.rows, vec![
            vec![Value::Bool(false), Value::Int(1)],
            vec![Value::Bool(true), Value::Int(2)],
        ]);
    }

    #[test]
    fn test_distinct_skip_limit() {
        let mut g = seed();
        let result = run(&mut g, "MATCH (p:Person) RETURN DISTINCT p:Person AS person", &PropertyMap::new());
        assert_eq!(result.rows, vec![vec![Value::Bool(true)]]);

        let paged = run(&mut g, "MATCH (p:Person) RETURN p.name ORDER BY p.name SKIP 1 LIMIT $n", &params! { "n" => 1 });
        assert_eq!(paged.rows, vec![vec![Value::from("Charles")]]);
    }

    #[test]
    fn test_set_remove() {
        let mut g = seed();
        let result = run(&mut g, "MATCH (p:Person {name: 'Ada'}) SET p.age = 37, p:Countess, p += {title: 'Lady'} REMOVE p.missing RETURN p", &PropertyMap::new());
        let node = result.rows[0][0].as_node().unwrap();
        assert_eq!(node.property("age"), Some(&Value::Int(37)));
        assert_eq!(node.property("title"), Some(&Value::from("Lady")));
        assert!(node.has_label("Countess"));
        assert_eq!(result.stats.labels_added, 1);

        let cleared = run(&mut g, "MATCH (p:Person {name: 'Ada'}) SET p.title = null REMOVE p:Countess RETURN p", &PropertyMap::new());
        let node = cleared.rows[0][0].as_node().unwrap();
        assert_eq!(node.property("title"), None);
        assert!(!node.has_label("Countess"));
    }

    #[test]
    fn test_delete_requires_detach() {
        let mut g = seed();
        let query = parse("MATCH (p:Person {name: 'Ada'}) DELETE p").unwrap();
        assert!(matches!(execute(&mut g, &query, &PropertyMap::new()), Err(Error::ConstraintViolation(_))));

        let result = run(&mut g, "MATCH (p:Person {name: 'Ada'}) DETACH DELETE p RETURN count(p) AS removed", &PropertyMap::new());
        assert_eq!(result.rows, vec![vec![Value::Int(1)]]);
        assert_eq!(result.stats.nodes_deleted, 1);
        assert_eq!(result.stats.relationships_deleted, 1);
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.relationship_count(), 0);
    }

    #[test]
    fn test_merge() {
        let mut g = seed();
        let matched = run(&mut g, "MERGE (p:Person {name: 'Ada'}) ON MATCH SET p.seen = true RETURN p.seen", &PropertyMap::new());
        assert_eq!(matched.rows, vec![vec![Value::Bool(true)]]);
        assert_eq!(matched.stats.nodes_created, 0);

        let created = run(&mut g, "MERGE (p:Person {name: 'Alan'}) ON CREATE SET p.new = true RETURN p.new", &PropertyMap::new());
        assert_eq!(created.rows, vec![vec![Value::Bool(true)]]);
        assert_eq!(created.stats.nodes_created, 1);
        assert_eq!(g.node_count(), 4);
    }

    #[test]
    fn test_create_between_matched_nodes() {
        let mut g = seed();
        run(&mut g, "MATCH (a:Person {name: 'Grace'}), (b:Person {name: 'Ada'}) CREATE (a)-[:ADMIRES]->(b)", &PropertyMap::new());
        let result = run(&mut g, "MATCH (a)-[:ADMIRES]->(b) RETURN a.name, b.name", &PropertyMap::new());
        assert_eq!(result.rows, vec![vec![Value::from("Grace"), Value::from("Ada")]]);

        let query = parse("MATCH (a:Person {name: 'Grace'}) CREATE (a)-[:X|Y]->(b)").unwrap();
        assert!(matches!(execute(&mut g, &query, &PropertyMap::new()), Err(Error::SemanticError(_))));
    }

    #[test]
    fn test_return_star_and_functions() {
        let mut g = seed();
        let result = run(&mut g, "MATCH (a)-[r]->(b) RETURN *", &PropertyMap::new());
        assert_eq!(result.columns, vec!["a", "b", "r"]);

        let result = run(&mut g, "MATCH (a)-[r]->(b) RETURN type(r), labels(a), keys(b), id(a) = id(b)", &PropertyMap::new());
        assert_eq!(result.rows[0], vec![
            Value::from("KNOWS"),
            Value::from(vec!["Person"]),
            Value::from(vec!["age", "name"]),
            Value::Bool(false),
        ]);
    }

    #[test]
    fn test_missing_parameter() {
        let mut g = MemoryGraph::new();
        let query = parse("MATCH (n) WHERE n.name = $name RETURN n").unwrap();
        // No nodes: WHERE is never evaluated.
        assert!(execute(&mut g, &query, &PropertyMap::new()).is_ok());

        let query = parse("CREATE (n {name: $name})").unwrap();
        assert!(matches!(execute(&mut g, &query, &PropertyMap::new()), Err(Error::ParameterMissing(_))));
    }
}
