//! In-memory property graph.
//!
//! `MemoryGraph` is plain owned data: cloning it produces an independent
//! snapshot. The embedded driver relies on that for transaction isolation
//! (a transaction mutates its own clone; commit publishes it).
//!
//! Nodes and relationships are kept in ordered maps so scans come back in
//! creation order, which keeps query results deterministic.
//!
//! Every write path checks property values: maps, nodes and relationships
//! fail with `Error::TypeError` and leave the graph untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::*;
use crate::{Error, Result};

// ============================================================================
// MemoryGraph
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: BTreeMap<NodeId, Node>,
    relationships: BTreeMap<RelId, Relationship>,
    /// node_id → list of relationship IDs
    adjacency: HashMap<NodeId, Vec<RelId>>,
    /// label → set of node IDs (poor man's label index)
    label_index: HashMap<String, BTreeSet<NodeId>>,
    next_node_id: u64,
    next_rel_id: u64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            next_node_id: 1,
            next_rel_id: 1,
            ..Self::default()
        }
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties. Null-valued
    /// properties are not stored.
    pub fn create_node(&mut self, labels: &[String], props: PropertyMap) -> Result<NodeId> {
        let properties = stored_properties(props)?;
        let id = NodeId(self.next_node_id.max(1));
        self.next_node_id = id.0 + 1;

        let mut unique: Vec<String> = Vec::with_capacity(labels.len());
        for label in labels {
            if !unique.contains(label) {
                unique.push(label.clone());
            }
        }
        let node = Node::new(id, unique, properties);

        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().insert(id);
        }
        self.nodes.insert(id, node);
        self.adjacency.insert(id, Vec::new());
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Delete a node. Returns true if it existed.
    /// Fails if the node still has relationships (Neo4j semantics).
    pub fn delete_node(&mut self, id: NodeId) -> Result<bool> {
        if let Some(rels) = self.adjacency.get(&id) {
            if !rels.is_empty() {
                return Err(Error::ConstraintViolation(format!(
                    "Cannot delete node {id} with {} relationships. Delete relationships first.",
                    rels.len()
                )));
            }
        }

        let removed = self.nodes.remove(&id);
        self.adjacency.remove(&id);

        if let Some(node) = &removed {
            for label in &node.labels {
                if let Some(ids) = self.label_index.get_mut(label) {
                    ids.remove(&id);
                }
            }
        }
        Ok(removed.is_some())
    }

    /// Delete a node and all its relationships. Neo4j: `DETACH DELETE n`
    pub fn detach_delete_node(&mut self, id: NodeId) -> Result<bool> {
        let rel_ids = self.adjacency.get(&id).cloned().unwrap_or_default();
        for rid in rel_ids {
            self.delete_relationship(rid);
        }
        self.delete_node(id)
    }

    /// Set a property on a node (upsert). Setting NULL removes the property.
    pub fn set_node_property(&mut self, id: NodeId, key: &str, val: Value) -> Result<()> {
        check_property(key, &val)?;
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        if val.is_null() {
            node.properties.remove(key);
        } else {
            node.properties.insert(key.to_string(), val);
        }
        Ok(())
    }

    pub fn remove_node_property(&mut self, id: NodeId, key: &str) -> Result<()> {
        self.set_node_property(id, key, Value::Null)
    }

    /// Replace every property of a node. Neo4j: `SET n = {map}`
    pub fn replace_node_properties(&mut self, id: NodeId, props: PropertyMap) -> Result<()> {
        let properties = stored_properties(props)?;
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        node.properties = properties;
        Ok(())
    }

    /// Add a label to a node. Returns true if the label was new.
    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        if node.has_label(label) {
            return Ok(false);
        }
        node.labels.push(label.to_string());
        self.label_index.entry(label.to_string()).or_default().insert(id);
        Ok(true)
    }

    /// Remove a label from a node. Returns true if the node had it.
    pub fn remove_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        let before = node.labels.len();
        node.labels.retain(|l| l != label);
        let removed = node.labels.len() != before;
        if let Some(ids) = self.label_index.get_mut(label) {
            ids.remove(&id);
        }
        Ok(removed)
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship between two existing nodes.
    pub fn create_relationship(
        &mut self,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        if !self.nodes.contains_key(&src) {
            return Err(Error::NotFound(format!("Source node {src}")));
        }
        if !self.nodes.contains_key(&dst) {
            return Err(Error::NotFound(format!("Target node {dst}")));
        }
        let properties = stored_properties(props)?;

        let id = RelId(self.next_rel_id.max(1));
        self.next_rel_id = id.0 + 1;

        self.relationships.insert(id, Relationship::new(id, (src, dst), rel_type, properties));

        // Update adjacency for both endpoints
        self.adjacency.entry(src).or_default().push(id);
        if src != dst {
            self.adjacency.entry(dst).or_default().push(id);
        }
        Ok(id)
    }

    pub fn relationship(&self, id: RelId) -> Option<&Relationship> {
        self.relationships.get(&id)
    }

    /// Delete a relationship. Returns true if it existed.
    pub fn delete_relationship(&mut self, id: RelId) -> bool {
        let removed = self.relationships.remove(&id);
        if let Some(rel) = &removed {
            if let Some(rels) = self.adjacency.get_mut(&rel.start_node) {
                rels.retain(|rid| *rid != id);
            }
            if rel.start_node != rel.end_node {
                if let Some(rels) = self.adjacency.get_mut(&rel.end_node) {
                    rels.retain(|rid| *rid != id);
                }
            }
        }
        removed.is_some()
    }

    /// Set a property on a relationship (upsert). Setting NULL removes it.
    pub fn set_relationship_property(&mut self, id: RelId, key: &str, val: Value) -> Result<()> {
        check_property(key, &val)?;
        let rel = self.relationships.get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        if val.is_null() {
            rel.properties.remove(key);
        } else {
            rel.properties.insert(key.to_string(), val);
        }
        Ok(())
    }

    pub fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<()> {
        self.set_relationship_property(id, key, Value::Null)
    }

    pub fn replace_relationship_properties(&mut self, id: RelId, props: PropertyMap) -> Result<()> {
        let properties = stored_properties(props)?;
        let rel = self.relationships.get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Relationship {id}")))?;
        rel.properties = properties;
        Ok(())
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Relationships of a node, optionally filtered by direction and type.
    pub fn relationships_of(
        &self,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Vec<&Relationship> {
        let Some(rel_ids) = self.adjacency.get(&node) else {
            return Vec::new();
        };

        rel_ids
            .iter()
            .filter_map(|rid| self.relationships.get(rid))
            .filter(|rel| dir.admits(rel, node))
            .filter(|rel| rel_type.is_none_or(|t| rel.rel_type == t))
            .collect()
    }

    // ========================================================================
    // Scan / introspection
    // ========================================================================

    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn all_relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    /// Find all nodes with a given label.
    pub fn nodes_by_label(&self, label: &str) -> Vec<&Node> {
        self.label_index
            .get(label)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// All distinct labels in use.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.label_index
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(label, _)| label.clone())
            .collect();
        labels.sort();
        labels
    }

    /// All distinct relationship types in use.
    pub fn relationship_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.relationships.values().map(|r| r.rel_type.clone()).collect();
        types.sort();
        types.dedup();
        types
    }
}

fn check_property(key: &str, val: &Value) -> Result<()> {
    if val.is_storable() {
        return Ok(());
    }
    Err(Error::TypeError {
        expected: format!("a scalar or flat list for property '{key}'"),
        got: val.type_name().to_string(),
    })
}

/// Drop nulls; reject values that cannot be stored.
fn stored_properties(props: PropertyMap) -> Result<PropertyMap> {
    props
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(key, val)| {
            check_property(&key, &val)?;
            Ok((key, val))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
