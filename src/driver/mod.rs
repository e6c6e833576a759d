//! # Driver Contract
//!
//! The contract between the mapping layer and a graph database driver.
//! `DatabaseContext` only ever talks to these traits.
//!
//! ## Implementations
//!
//! | Driver | Module | URL scheme | Description |
//! |--------|--------|------------|-------------|
//! | `MemoryDriver` | `memory` | `memory://<instance>` | Embedded in-process graph server |
//! | `BoltDriver` | `bolt` | `bolt://`, `neo4j://` (`+s`, `+ssc`) | Neo4j server via `neo4rs` (feature `bolt`) |
//!
//! ## Lifecycle
//!
//! ```text
//! Driver (one per process) ──session()──▶ Session ──begin_transaction()──▶ Transaction
//!                                            │                                 │
//!                                            └── run() (auto-commit)           ├── run()
//!                                                                              ├── commit()
//!                                                                              └── rollback()
//! ```
//!
//! At most one transaction may be open per session. Drivers enforce that
//! with `Error::TransactionAlreadyOpen`.

pub mod memory;
#[cfg(feature = "bolt")]
pub mod bolt;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::execution::{ExecutionStats, QueryResult};
use crate::model::{PropertyMap, Record};
use crate::tx::{AccessMode, TransactionConfig, TxId};
use crate::Result;

pub use memory::{MemoryDriver, MemoryServer, MemorySession, MemoryTransaction};
#[cfg(feature = "bolt")]
pub use bolt::{BoltDriver, BoltSession, BoltTransaction};

// ============================================================================
// Authentication / session configuration
// ============================================================================

/// Credentials presented when connecting.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthToken {
    /// No authentication.
    None,
    /// Username and password.
    Basic { username: String, password: String },
}

impl AuthToken {
    pub fn none() -> Self {
        AuthToken::None
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        AuthToken::Basic {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthToken::None => write!(f, "AuthToken::None"),
            AuthToken::Basic { username, .. } => f
                .debug_struct("AuthToken::Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Target database; `None` selects the server default.
    pub database: Option<String>,
    pub access_mode: AccessMode,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// Records produced by one query, plus its update counters.
#[derive(Debug, Clone, Default)]
pub struct RecordStream {
    keys: Arc<[String]>,
    records: VecDeque<Record>,
    summary: ExecutionStats,
}

impl RecordStream {
    pub fn new(keys: Arc<[String]>, records: impl IntoIterator<Item = Record>, summary: ExecutionStats) -> Self {
        Self {
            keys,
            records: records.into_iter().collect(),
            summary,
        }
    }

    /// Column names.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn summary(&self) -> &ExecutionStats {
        &self.summary
    }

    /// Records not consumed yet.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records.into()
    }
}

impl From<QueryResult> for RecordStream {
    fn from(result: QueryResult) -> Self {
        let keys: Arc<[String]> = result.columns.into();
        let records = result
            .rows
            .into_iter()
            .map(|values| Record::new(Arc::clone(&keys), values))
            .collect::<Vec<_>>();
        Self::new(keys, records, result.stats)
    }
}

impl Iterator for RecordStream {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.records.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.records.len(), Some(self.records.len()))
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A driver: the process-wide handle that hands out sessions.
#[async_trait]
pub trait Driver: Send + Sync + Sized + 'static {
    type Session: Session;

    /// Build a driver for `url`. Connections are made lazily; use
    /// [`Driver::verify_connectivity`] to check the server up front.
    fn connect(url: &str, auth: AuthToken) -> Result<Self>;

    /// Open a session against the configured (or default) database.
    async fn session(&self, config: SessionConfig) -> Result<Self::Session>;

    async fn verify_connectivity(&self) -> Result<()>;

    /// Close the driver. Sessions opened later fail with
    /// `Error::ServiceUnavailable`.
    async fn close(&self) -> Result<()>;
}

/// A session: a sequence of auto-commit queries and transactions against
/// one database.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    type Tx: Transaction;

    /// Name of the database this session is bound to.
    fn database(&self) -> &str;

    /// Run a query in its own auto-commit transaction.
    async fn run(&self, query: &str, params: PropertyMap) -> Result<RecordStream>;

    /// Open an explicit transaction. Fails with
    /// `Error::TransactionAlreadyOpen` while another one is open.
    async fn begin_transaction(&self, config: TransactionConfig) -> Result<Self::Tx>;

    async fn close(&self) -> Result<()>;
}

/// An explicit transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait Transaction: Send + Sync + Sized + 'static {
    fn id(&self) -> TxId;

    /// Run a query inside the transaction. Sees the transaction's own
    /// uncommitted writes.
    async fn run(&mut self, query: &str, params: PropertyMap) -> Result<RecordStream>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Entry point mirroring the official drivers' `GraphDatabase.driver(..)`.
pub struct GraphDatabase;

impl GraphDatabase {
    pub fn driver<D: Driver>(url: &str, auth: AuthToken) -> Result<D> {
        tracing::info!(url, "creating graph driver");
        D::connect(url, auth)
    }
}
