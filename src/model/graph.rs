//! Graph entities as records carry them: a node or relationship together
//! with the id the store assigned to it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{PropertyMap, Value};

/// Store-assigned node id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Store-assigned relationship id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(id: NodeId, labels: Vec<String>, properties: PropertyMap) -> Self {
        Self { id, labels, properties }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|own| own == label)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A directed, typed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub start_node: NodeId,
    pub end_node: NodeId,
    pub rel_type: String,
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(id: RelId, (start_node, end_node): (NodeId, NodeId), rel_type: impl Into<String>, properties: PropertyMap) -> Self {
        Self { id, start_node, end_node, rel_type: rel_type.into(), properties }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// The endpoint across from `node`, or `None` when `node` is not an
    /// endpoint. A self-loop is its own opposite.
    pub fn opposite(&self, node: NodeId) -> Option<NodeId> {
        match (self.start_node == node, self.end_node == node) {
            (true, _) => Some(self.end_node),
            (false, true) => Some(self.start_node),
            (false, false) => None,
        }
    }
}

/// Which relationships of a node a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    /// Whether `rel` leaves `node` in this direction.
    pub fn admits(self, rel: &Relationship, node: NodeId) -> bool {
        match self {
            Direction::Outgoing => rel.start_node == node,
            Direction::Incoming => rel.end_node == node,
            Direction::Both => rel.opposite(node).is_some(),
        }
    }
}
