//! # neo4j-berries-ogm: Object-Graph Mapping over a Neo4j-style driver
//!
//! Describe graph entities as plain serde structs and run them through a
//! transaction-scoped `DatabaseContext`.
//!
//! A context owns one session and at most one active transaction. Work
//! handed to [`DatabaseContext::begin_transaction`] is committed when it
//! succeeds and rolled back when it fails, and the slot is cleared either
//! way. [`NodeSet`] and [`MappedRelation`] build their Cypher from serde
//! structs, so entity types need no hand-written mapping code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use neo4j_berries_ogm::{
//!     params, AuthToken, DatabaseContext, Driver, Error, MemoryDriver, MemoryServer,
//!     SessionConfig, TransactionConfig,
//! };
//!
//! # async fn example() -> neo4j_berries_ogm::Result<()> {
//! let server = MemoryServer::start("quickstart")?;
//! let driver = Arc::new(MemoryDriver::connect(&server.url(), AuthToken::none())?);
//! let mut db = DatabaseContext::open(driver, SessionConfig::new()).await?;
//!
//! db.begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
//!     db.run_query("CREATE (:Person {name: $name})", params! { "name" => "Ada" }).await?;
//!     Ok::<_, Error>(())
//! })).await?;
//!
//! for record in db.run_query("MATCH (p:Person) RETURN p.name AS name", params! {}).await? {
//!     println!("{}", record.get::<String>("name")?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Drivers
//!
//! | Driver | URL | Description |
//! |--------|-----|-------------|
//! | `MemoryDriver` | `memory://<instance>` | Embedded in-process graph server |
//! | `BoltDriver` | `bolt://host:7687`, `neo4j://..` | Neo4j server through `neo4rs` (feature `bolt`) |
//!
//! ```rust,ignore
//! let options = Neo4jOptions::from_env()?; // NEO4J_URL=bolt://localhost:7687
//! let mut db = DatabaseContext::<BoltDriver>::from_options(&options).await?;
//! ```

pub mod blocking;
pub mod config;
pub mod context;
pub mod cypher;
pub mod driver;
pub mod execution;
pub mod model;
pub mod registration;
pub mod relation;
pub mod sets;
pub mod storage;
pub mod tx;

pub use blocking::{BlockingDatabaseContext, BlockingTransaction};
pub use config::Neo4jOptions;
pub use context::{ActiveTransaction, DatabaseContext, TxOf};
pub use driver::{
    AuthToken, Driver, GraphDatabase, MemoryDriver, MemoryServer, MemorySession, MemoryTransaction, RecordStream,
    Session, SessionConfig, Transaction,
};
#[cfg(feature = "bolt")]
pub use driver::{BoltDriver, BoltSession, BoltTransaction};
pub use execution::{ExecutionStats, QueryResult};
pub use model::{Direction, FromValue, Node, NodeId, PropertyMap, Record, RelId, Relationship, Value};
pub use registration::{add_neo4j, GraphContext, Neo4jServices, Neo4jSingletonContext, OgmConfigurationBuilder};
pub use relation::{MappedRelation, RelationshipEntity};
pub use sets::{NodeEntity, NodeSet};
pub use tx::{AccessMode, TransactionConfig, TxId};

/// Every failure the crate reports, from Cypher parsing up to entity mapping.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Query text and evaluation
    #[error("syntax error at offset {position}: {message}")]
    SyntaxError { position: usize, message: String },
    #[error("invalid query: {0}")]
    SemanticError(String),
    #[error("type mismatch: expected {expected}, found {got}")]
    TypeError { expected: String, got: String },
    #[error("query failed: {0}")]
    ExecutionError(String),
    #[error("missing parameter ${0}")]
    ParameterMissing(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("constraint violated: {0}")]
    ConstraintViolation(String),

    // Connection
    #[error("authentication rejected: {0}")]
    AuthenticationFailed(String),
    #[error("server unreachable: {0}")]
    ServiceUnavailable(String),
    #[error("no database named '{0}'")]
    DatabaseNotFound(String),
    #[error("session already closed")]
    SessionClosed,

    // Transactions
    /// A session runs one transaction at a time.
    #[error("session already has an open transaction")]
    TransactionAlreadyOpen,
    #[error("no transaction is active")]
    NoActiveTransaction,
    #[error("transaction already committed or rolled back")]
    TransactionClosed,
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    /// Another transaction committed first.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),
    #[error("transaction exceeded its {0:?} timeout")]
    TransactionTimedOut(std::time::Duration),
    #[error("cancelled")]
    Cancelled,

    // Setup and mapping
    #[error("bad configuration: {0}")]
    Config(String),
    #[error("cannot map entity: {0}")]
    Mapping(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
