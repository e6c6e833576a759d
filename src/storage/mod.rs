//! # Embedded Storage
//!
//! | Type | Module | Description |
//! |------|--------|-------------|
//! | `MemoryGraph` | `memory` | Owned, cloneable property graph |
//! | `Database` | here | A named, versioned graph shared by sessions |
//!
//! A `Database` publishes a new version on every successful write. Readers
//! take snapshots; writers either mutate a working copy under the write lock
//! (auto-commit) or publish a snapshot they mutated on their own
//! (transactions, first committer wins).

pub mod memory;

use parking_lot::RwLock;

use crate::{Error, Result};

pub use memory::MemoryGraph;

/// Name of the database every instance starts with.
pub const DEFAULT_DATABASE: &str = "neo4j";

/// A named graph plus the version counter used for write-conflict detection.
pub struct Database {
    name: String,
    state: RwLock<Versioned>,
}

struct Versioned {
    graph: MemoryGraph,
    version: u64,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(Versioned {
                graph: MemoryGraph::new(),
                version: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Copy of the committed graph together with its version.
    pub fn snapshot(&self) -> (MemoryGraph, u64) {
        let state = self.state.read();
        (state.graph.clone(), state.version)
    }

    /// Run `f` against a working copy of the committed graph while holding
    /// the write lock. The copy replaces the committed graph only when `f`
    /// succeeds and reports that it wrote something; on error nothing is
    /// applied.
    pub fn apply<T>(&self, f: impl FnOnce(&mut MemoryGraph) -> Result<(T, bool)>) -> Result<T> {
        let mut state = self.state.write();
        let mut working = state.graph.clone();
        let (out, wrote) = f(&mut working)?;
        if wrote {
            state.graph = working;
            state.version += 1;
        }
        Ok(out)
    }

    /// Publish a graph that was derived from version `base_version`.
    ///
    /// Fails with `TransactionConflict` if another writer published in the
    /// meantime.
    pub fn publish(&self, graph: MemoryGraph, base_version: u64) -> Result<u64> {
        let mut state = self.state.write();
        if state.version != base_version {
            return Err(Error::TransactionConflict(format!(
                "database '{}' moved from version {base_version} to {} while the transaction was open",
                self.name, state.version
            )));
        }
        state.graph = graph;
        state.version += 1;
        Ok(state.version)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("version", &self.version())
            .finish()
    }
}
