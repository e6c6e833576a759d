//! Pattern matching and pattern creation.
//!
//! Matching is a depth-first search over the pattern chain. Within one
//! MATCH clause a relationship is bound at most once (relationship
//! isomorphism), nodes may repeat.

use crate::cypher::ast::*;
use crate::model::*;
use crate::storage::MemoryGraph;
use crate::{Error, Result};

use super::ExecutionStats;
use super::eval::{Evaluator, Row, type_error};

/// All extensions of `row` that match every pattern.
pub fn match_patterns(ev: &Evaluator, patterns: &[Pattern], row: &Row) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    let mut row = row.clone();
    let mut used = Vec::new();
    search(ev, patterns, &mut row, &mut used, &mut out)?;
    Ok(out)
}

fn search(
    ev: &Evaluator,
    patterns: &[Pattern],
    row: &mut Row,
    used: &mut Vec<RelId>,
    out: &mut Vec<Row>,
) -> Result<()> {
    let Some((pattern, rest)) = patterns.split_first() else {
        out.push(row.clone());
        return Ok(());
    };

    for node in start_candidates(ev, &pattern.start, row)? {
        let bound = bind(row, pattern.start.var.as_deref(), Value::Node(Box::new(node.clone())));
        extend(ev, pattern, 0, node.id, rest, row, used, out)?;
        unbind(row, bound);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn extend(
    ev: &Evaluator,
    pattern: &Pattern,
    step: usize,
    current: NodeId,
    rest: &[Pattern],
    row: &mut Row,
    used: &mut Vec<RelId>,
    out: &mut Vec<Row>,
) -> Result<()> {
    let Some(Hop { rel: rel_pat, node: node_pat }) = pattern.hops.get(step) else {
        return search(ev, rest, row, used, out);
    };

    let rel_props = ev.eval_properties(rel_pat.props.as_ref(), row)?;
    let bound_rel = match rel_pat.var.as_deref().and_then(|a| row.get(a)) {
        None => None,
        Some(Value::Relationship(r)) => Some(r.id),
        Some(Value::Null) => return Ok(()),
        Some(other) => return Err(type_error("Relationship", other)),
    };

    let candidates: Vec<Relationship> = ev
        .graph
        .relationships_of(current, rel_pat.direction, None)
        .into_iter()
        .filter(|r| rel_pat.types.is_empty() || rel_pat.types.contains(&r.rel_type))
        .filter(|r| bound_rel.is_none_or(|id| id == r.id))
        .filter(|r| !used.contains(&r.id))
        .filter(|r| properties_match(&r.properties, &rel_props))
        .cloned()
        .collect();

    for rel in candidates {
        let next = match rel_pat.direction {
            Direction::Outgoing => rel.end_node,
            Direction::Incoming => rel.start_node,
            Direction::Both => rel.opposite(current).unwrap_or(rel.end_node),
        };
        let Some(node) = ev.graph.node(next).cloned() else { continue };
        if !node_matches(ev, node_pat, &node, row)? {
            continue;
        }

        used.push(rel.id);
        let rel_bound = bind(row, rel_pat.var.as_deref(), Value::Relationship(Box::new(rel)));
        let node_bound = bind(row, node_pat.var.as_deref(), Value::Node(Box::new(node)));
        extend(ev, pattern, step + 1, next, rest, row, used, out)?;
        unbind(row, node_bound);
        unbind(row, rel_bound);
        used.pop();
    }
    Ok(())
}

fn start_candidates(ev: &Evaluator, np: &NodePattern, row: &Row) -> Result<Vec<Node>> {
    if let Some(value) = np.var.as_deref().and_then(|a| row.get(a)) {
        return match ev.refresh(value) {
            Value::Node(n) => Ok(if node_matches(ev, np, &n, row)? { vec![*n] } else { Vec::new() }),
            Value::Null => Ok(Vec::new()),
            other => Err(type_error("Node", &other)),
        };
    }

    let scan: Vec<&Node> = match np.labels.first() {
        Some(label) => ev.graph.nodes_by_label(label),
        None => ev.graph.all_nodes().collect(),
    };
    let props = ev.eval_properties(np.props.as_ref(), row)?;
    Ok(scan
        .into_iter()
        .filter(|n| np.labels.iter().all(|l| n.has_label(l)))
        .filter(|n| properties_match(&n.properties, &props))
        .cloned()
        .collect())
}

fn node_matches(ev: &Evaluator, np: &NodePattern, node: &Node, row: &Row) -> Result<bool> {
    if let Some(value) = np.var.as_deref().and_then(|a| row.get(a)) {
        match value {
            Value::Node(bound) if bound.id == node.id => {}
            Value::Node(_) | Value::Null => return Ok(false),
            other => return Err(type_error("Node", other)),
        }
    }
    if !np.labels.iter().all(|l| node.has_label(l)) {
        return Ok(false);
    }
    let props = ev.eval_properties(np.props.as_ref(), row)?;
    Ok(properties_match(&node.properties, &props))
}

/// Every expected property is present and equal. A NULL expectation never
/// matches.
fn properties_match(actual: &PropertyMap, expected: &PropertyMap) -> bool {
    expected
        .iter()
        .all(|(k, v)| actual.get(k).is_some_and(|a| a.cypher_eq(v) == Some(true)))
}

/// Bind `alias` if it is not bound yet. Returns the alias to unbind later.
fn bind(row: &mut Row, alias: Option<&str>, value: Value) -> Option<String> {
    let alias = alias?;
    if row.contains_key(alias) {
        return None;
    }
    row.insert(alias.to_string(), value);
    Some(alias.to_string())
}

fn unbind(row: &mut Row, bound: Option<String>) {
    if let Some(alias) = bound {
        row.remove(&alias);
    }
}

// ============================================================================
// Creation
// ============================================================================

/// Create every unbound element of `pattern`, binding new aliases in `row`.
pub fn create_pattern(
    graph: &mut MemoryGraph,
    params: &PropertyMap,
    pattern: &Pattern,
    row: &mut Row,
    stats: &mut ExecutionStats,
) -> Result<()> {
    let mut current = resolve_or_create_node(graph, params, &pattern.start, row, stats)?;

    for Hop { rel: rel_pat, node: node_pat } in &pattern.hops {
        let target = resolve_or_create_node(graph, params, node_pat, row, stats)?;

        let [rel_type] = rel_pat.types.as_slice() else {
            return Err(Error::SemanticError(
                "Exactly one relationship type must be specified for CREATE".into(),
            ));
        };
        let (src, dst) = match rel_pat.direction {
            Direction::Outgoing => (current, target),
            Direction::Incoming => (target, current),
            Direction::Both => {
                return Err(Error::SemanticError(
                    "Only directed relationships are supported in CREATE".into(),
                ));
            }
        };
        if let Some(alias) = rel_pat.var.as_deref() {
            if row.contains_key(alias) {
                return Err(Error::SemanticError(format!("Variable `{alias}` already declared")));
            }
        }

        let props = {
            let ev = Evaluator::new(graph, params);
            ev.eval_properties(rel_pat.props.as_ref(), row)?
        };
        stats.properties_set += props.values().filter(|v| !v.is_null()).count() as u64;
        let id = graph.create_relationship(src, dst, rel_type, props)?;
        stats.relationships_created += 1;

        if let (Some(alias), Some(rel)) = (rel_pat.var.as_deref(), graph.relationship(id)) {
            row.insert(alias.to_string(), Value::Relationship(Box::new(rel.clone())));
        }
        current = target;
    }
    Ok(())
}

fn resolve_or_create_node(
    graph: &mut MemoryGraph,
    params: &PropertyMap,
    np: &NodePattern,
    row: &mut Row,
    stats: &mut ExecutionStats,
) -> Result<NodeId> {
    if let Some(alias) = np.var.as_deref() {
        match row.get(alias) {
            Some(Value::Node(n)) => {
                if !np.labels.is_empty() || np.props.is_some() {
                    return Err(Error::SemanticError(format!(
                        "Variable `{alias}` already declared"
                    )));
                }
                return Ok(n.id);
            }
            Some(Value::Null) => {
                return Err(Error::ExecutionError(format!(
                    "Failed to create relationship: node `{alias}` is null"
                )));
            }
            Some(other) => return Err(type_error("Node", other)),
            None => {}
        }
    }

    let props = {
        let ev = Evaluator::new(graph, params);
        ev.eval_properties(np.props.as_ref(), row)?
    };
    stats.properties_set += props.values().filter(|v| !v.is_null()).count() as u64;
    let id = graph.create_node(&np.labels, props)?;
    stats.nodes_created += 1;
    stats.labels_added += np.labels.len() as u64;

    if let (Some(alias), Some(node)) = (np.var.as_deref(), graph.node(id)) {
        row.insert(alias.to_string(), Value::Node(Box::new(node.clone())));
    }
    Ok(id)
}
