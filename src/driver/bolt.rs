//! Driver for a real Neo4j server over Bolt, built on `neo4rs`.
//!
//! One `neo4rs::Graph` connection pool is kept per database and shared by
//! every session opened for it. Sessions enforce the same one-transaction
//! rule as the embedded driver; a transaction dropped without commit is
//! rolled back on a spawned task.
//!
//! Differences from `memory://`:
//! - update counters are not reported (`RecordStream::summary` is empty)
//! - record columns come back in key order
//! - transaction timeouts are checked by the client on run and commit
//! - temporal parameters are sent as ISO-8601 strings

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use neo4rs::{BoltBytes, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{AuthToken, Driver, RecordStream, Session, SessionConfig, Transaction};
use crate::execution::ExecutionStats;
use crate::model::{Node, NodeId, PropertyMap, Record, RelId, Relationship, Value};
use crate::storage::DEFAULT_DATABASE;
use crate::tx::{AccessMode, TransactionConfig, TxId};
use crate::{Error, Result};

const SCHEMES: [&str; 6] = ["bolt", "bolt+s", "bolt+ssc", "neo4j", "neo4j+s", "neo4j+ssc"];

// ============================================================================
// Driver
// ============================================================================

/// Driver for `bolt://` and `neo4j://` URLs (and their `+s`/`+ssc` forms).
pub struct BoltDriver {
    url: String,
    auth: AuthToken,
    /// Keyed by database name; empty for the server default.
    pools: Mutex<HashMap<String, Graph>>,
    next_tx_id: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl BoltDriver {
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn pool(&self, database: Option<&str>) -> Result<Graph> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ServiceUnavailable("driver has been closed".into()));
        }
        let key = database.unwrap_or_default();
        if let Some(graph) = self.pools.lock().get(key) {
            return Ok(graph.clone());
        }

        let (user, password) = match &self.auth {
            AuthToken::Basic { username, password } => (username.as_str(), password.as_str()),
            AuthToken::None => ("", ""),
        };
        let mut config = ConfigBuilder::default().uri(self.url.as_str()).user(user).password(password);
        if let Some(name) = database {
            config = config.db(name);
        }
        let graph = Graph::connect(config.build().map_err(bolt_error)?)
            .await
            .map_err(bolt_error)?;
        debug!(url = %self.url, database = key, "bolt connection pool created");

        // Another session may have raced us here; keep the first pool.
        Ok(self.pools.lock().entry(key.to_string()).or_insert(graph).clone())
    }
}

#[async_trait]
impl Driver for BoltDriver {
    type Session = BoltSession;

    fn connect(url: &str, auth: AuthToken) -> Result<Self> {
        let scheme = url.split_once("://").map(|(scheme, _)| scheme);
        if !scheme.is_some_and(|s| SCHEMES.contains(&s)) {
            return Err(Error::Config(format!(
                "unsupported URL '{url}', expected one of {}",
                SCHEMES.map(|s| format!("{s}://")).join(", ")
            )));
        }
        debug!(url, "bolt driver created");
        Ok(Self {
            url: url.to_string(),
            auth,
            pools: Mutex::new(HashMap::new()),
            next_tx_id: Arc::new(AtomicU64::new(1)),
            closed: AtomicBool::new(false),
        })
    }

    async fn session(&self, config: SessionConfig) -> Result<BoltSession> {
        let graph = self.pool(config.database.as_deref()).await?;
        let database = config.database.unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        if config.access_mode == AccessMode::Read {
            debug!(database = %database, "bolt sessions leave read access to the server's routing");
        }
        debug!(url = %self.url, database = %database, "session opened");
        Ok(BoltSession {
            graph,
            database,
            next_tx_id: Arc::clone(&self.next_tx_id),
            tx_open: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        })
    }

    async fn verify_connectivity(&self) -> Result<()> {
        let graph = self.pool(None).await?;
        graph.run(Query::new("RETURN 1".to_string())).await.map_err(bolt_error)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pools.lock().clear();
            debug!(url = %self.url, "bolt driver closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for BoltDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltDriver")
            .field("url", &self.url)
            .field("auth", &self.auth)
            .field("pools", &self.pools.lock().len())
            .finish()
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct BoltSession {
    graph: Graph,
    database: String,
    next_tx_id: Arc<AtomicU64>,
    tx_open: Arc<AtomicBool>,
    closed: AtomicBool,
}

#[async_trait]
impl Session for BoltSession {
    type Tx = BoltTransaction;

    fn database(&self) -> &str {
        &self.database
    }

    async fn run(&self, query: &str, params: PropertyMap) -> Result<RecordStream> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        if self.tx_open.load(Ordering::Acquire) {
            return Err(Error::TransactionAlreadyOpen);
        }
        debug!(database = %self.database, query, "auto-commit run");

        let mut stream = self.graph.execute(bolt_query(query, params)?).await.map_err(bolt_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(bolt_error)? {
            rows.push(row);
        }
        record_stream(rows)
    }

    async fn begin_transaction(&self, config: TransactionConfig) -> Result<BoltTransaction> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SessionClosed);
        }
        if self
            .tx_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::TransactionAlreadyOpen);
        }

        let txn = match self.graph.start_txn().await {
            Ok(txn) => txn,
            Err(e) => {
                self.tx_open.store(false, Ordering::Release);
                return Err(bolt_error(e));
            }
        };
        let id = TxId(self.next_tx_id.fetch_add(1, Ordering::Relaxed));
        if !config.metadata.is_empty() {
            debug!(%id, metadata = ?config.metadata, "transaction metadata is not sent over bolt");
        }
        debug!(%id, database = %self.database, "transaction begun");
        Ok(BoltTransaction {
            id,
            txn: Some(txn),
            started: Instant::now(),
            timeout: config.timeout,
            session_tx_open: Arc::clone(&self.tx_open),
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(database = %self.database, "session closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for BoltSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltSession")
            .field("database", &self.database)
            .field("tx_open", &self.tx_open.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// Transaction
// ============================================================================

pub struct BoltTransaction {
    id: TxId,
    /// Taken by commit and rollback.
    txn: Option<Txn>,
    started: Instant,
    timeout: Option<Duration>,
    session_tx_open: Arc<AtomicBool>,
}

impl BoltTransaction {
    fn check_timeout(&self) -> Result<()> {
        match self.timeout {
            Some(timeout) if self.started.elapsed() > timeout => Err(Error::TransactionTimedOut(timeout)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transaction for BoltTransaction {
    fn id(&self) -> TxId {
        self.id
    }

    async fn run(&mut self, query: &str, params: PropertyMap) -> Result<RecordStream> {
        self.check_timeout()?;
        let txn = self.txn.as_mut().ok_or(Error::TransactionClosed)?;
        debug!(id = %self.id, query, "transaction run");

        let mut stream = txn.execute(bolt_query(query, params)?).await.map_err(bolt_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(txn.handle()).await.map_err(bolt_error)? {
            rows.push(row);
        }
        record_stream(rows)
    }

    async fn commit(mut self) -> Result<()> {
        self.check_timeout()?;
        let txn = self.txn.take().ok_or(Error::TransactionClosed)?;
        txn.commit().await.map_err(bolt_error)?;
        debug!(id = %self.id, "transaction committed");
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        let txn = self.txn.take().ok_or(Error::TransactionClosed)?;
        txn.rollback().await.map_err(bolt_error)?;
        debug!(id = %self.id, "transaction rolled back");
        Ok(())
    }
}

impl Drop for BoltTransaction {
    fn drop(&mut self) {
        self.session_tx_open.store(false, Ordering::Release);
        let Some(txn) = self.txn.take() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = txn.rollback().await {
                        warn!(%id, error = %e, "rollback of dropped transaction failed");
                    }
                });
            }
            Err(_) => warn!(%id, "transaction dropped outside a runtime; the server rolls it back when the connection closes"),
        }
    }
}

impl std::fmt::Debug for BoltTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltTransaction")
            .field("id", &self.id)
            .field("open", &self.txn.is_some())
            .finish()
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn bolt_error(err: neo4rs::Error) -> Error {
    use neo4rs::Error as Bolt;
    let message = err.to_string();
    match err {
        Bolt::AuthenticationError { .. } => Error::AuthenticationFailed(message),
        Bolt::ConnectionError { .. } | Bolt::IOError { .. } => Error::ServiceUnavailable(message),
        Bolt::UnsupportedScheme { .. } => Error::Config(message),
        Bolt::DeserializationError { .. } => Error::Mapping(message),
        _ if message.contains("DatabaseNotFound") => Error::DatabaseNotFound(message),
        _ => Error::ExecutionError(message),
    }
}

fn bolt_query(text: &str, params: PropertyMap) -> Result<Query> {
    params
        .into_iter()
        .try_fold(Query::new(text.to_string()), |query, (key, value)| {
            Ok(query.param(&key, to_bolt(value)?))
        })
}

fn bolt_string(value: String) -> BoltString {
    BoltString { value }
}

/// Parameter value as Bolt sends it.
fn to_bolt(value: Value) -> Result<BoltType> {
    Ok(match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(b),
        Value::Int(i) => BoltType::from(i),
        Value::Float(f) => BoltType::from(f),
        Value::String(s) => BoltType::String(bolt_string(s)),
        Value::Bytes(b) => BoltType::Bytes(BoltBytes::new(bytes::Bytes::from(b))),
        Value::List(items) => BoltType::List(BoltList {
            value: items.into_iter().map(to_bolt).collect::<Result<_>>()?,
        }),
        Value::Map(map) => BoltType::Map(BoltMap {
            value: map
                .into_iter()
                .map(|(k, v)| Ok((bolt_string(k), to_bolt(v)?)))
                .collect::<Result<_>>()?,
        }),
        Value::Date(d) => BoltType::String(bolt_string(d.to_string())),
        Value::DateTime(dt) => BoltType::String(bolt_string(dt.to_rfc3339())),
        Value::LocalDateTime(dt) => BoltType::String(bolt_string(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        other @ (Value::Node(_) | Value::Relationship(_)) => {
            return Err(Error::TypeError {
                expected: "a parameter value".into(),
                got: other.type_name().into(),
            });
        }
    })
}

fn bolt_id(id: i64) -> Result<u64> {
    u64::try_from(id).map_err(|_| Error::Mapping(format!("negative entity id {id}")))
}

fn bolt_properties(map: BoltMap) -> Result<PropertyMap> {
    map.value.into_iter().map(|(k, v)| Ok((k.value, from_bolt(v)?))).collect()
}

/// Result value as the rest of the crate sees it.
fn from_bolt(value: BoltType) -> Result<Value> {
    Ok(match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::Int(i.value),
        BoltType::Float(f) => Value::Float(f.value),
        BoltType::String(s) => Value::String(s.value),
        BoltType::Bytes(b) => Value::Bytes(b.value.to_vec()),
        BoltType::List(list) => Value::List(list.value.into_iter().map(from_bolt).collect::<Result<_>>()?),
        BoltType::Map(map) => Value::Map(bolt_properties(map)?),
        BoltType::Node(node) => {
            let labels = node
                .labels
                .value
                .into_iter()
                .map(|label| match label {
                    BoltType::String(s) => Ok(s.value),
                    other => Err(Error::Mapping(format!("node label {other:?} is not a string"))),
                })
                .collect::<Result<_>>()?;
            Value::from(Node::new(NodeId(bolt_id(node.id.value)?), labels, bolt_properties(node.properties)?))
        }
        BoltType::Relation(rel) => Value::from(Relationship::new(
            RelId(bolt_id(rel.id.value)?),
            (NodeId(bolt_id(rel.start_node_id.value)?), NodeId(bolt_id(rel.end_node_id.value)?)),
            rel.typ.value,
            bolt_properties(rel.properties)?,
        )),
        other => return Err(Error::Mapping(format!("unsupported bolt value {other:?}"))),
    })
}

fn record_stream(rows: Vec<Row>) -> Result<RecordStream> {
    let mut keys: Option<Arc<[String]>> = None;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut columns: HashMap<String, BoltType> = row.to().map_err(|e| Error::Mapping(e.to_string()))?;
        let keys = keys.get_or_insert_with(|| {
            let mut names: Vec<String> = columns.keys().cloned().collect();
            names.sort();
            names.into()
        });
        let values = keys
            .iter()
            .map(|key| columns.remove(key).map_or(Ok(Value::Null), from_bolt))
            .collect::<Result<Vec<_>>>()?;
        records.push(Record::new(Arc::clone(keys), values));
    }
    Ok(RecordStream::new(keys.unwrap_or_else(|| Arc::from(Vec::new())), records, ExecutionStats::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use neo4rs::{BoltInteger, BoltNode, BoltRelation};

    #[test]
    fn test_connect_checks_scheme() {
        for url in ["bolt://localhost:7687", "neo4j+s://db.example.com", "bolt+ssc://10.0.0.1:7687"] {
            assert!(BoltDriver::connect(url, AuthToken::none()).is_ok(), "{url}");
        }
        for url in ["memory://app", "http://localhost:7474", "localhost:7687"] {
            assert!(matches!(BoltDriver::connect(url, AuthToken::none()), Err(Error::Config(_))), "{url}");
        }
    }

    #[test]
    fn test_parameters_to_bolt() {
        let list = to_bolt(Value::from(vec![1, 2])).unwrap();
        assert_eq!(list, BoltType::List(BoltList { value: vec![BoltType::from(1i64), BoltType::from(2i64)] }));
        assert_eq!(to_bolt(Value::Null).unwrap(), BoltType::Null(BoltNull));

        let date = chrono::NaiveDate::from_ymd_opt(1979, 5, 25).unwrap();
        assert_eq!(to_bolt(Value::Date(date)).unwrap(), BoltType::String(bolt_string("1979-05-25".into())));

        let node = Value::from(Node::new(NodeId(1), vec![], PropertyMap::new()));
        assert!(matches!(to_bolt(node), Err(Error::TypeError { .. })));
    }

    #[test]
    fn test_graph_values_from_bolt() {
        let mut props = BoltMap::new();
        props.put(bolt_string("name".into()), BoltType::String(bolt_string("Ada".into())));
        let labels = BoltList { value: vec![BoltType::String(bolt_string("Person".into()))] };
        let node = from_bolt(BoltType::Node(BoltNode::new(BoltInteger::new(7), labels, props))).unwrap();
        let node = node.as_node().unwrap();
        assert_eq!(node.id, NodeId(7));
        assert!(node.has_label("Person"));
        assert_eq!(node.property("name"), Some(&Value::from("Ada")));

        let rel = BoltRelation {
            id: BoltInteger::new(3),
            start_node_id: BoltInteger::new(7),
            end_node_id: BoltInteger::new(8),
            typ: bolt_string("KNOWS".into()),
            properties: BoltMap::new(),
        };
        let rel = from_bolt(BoltType::Relation(rel)).unwrap();
        let rel = rel.as_relationship().unwrap();
        assert_eq!((rel.start_node, rel.end_node), (NodeId(7), NodeId(8)));
        assert_eq!(rel.rel_type, "KNOWS");

        assert!(matches!(from_bolt(BoltType::Integer(BoltInteger::new(-1))), Ok(Value::Int(-1))));
        let bad = BoltNode::new(BoltInteger::new(-1), BoltList { value: vec![] }, BoltMap::new());
        assert!(matches!(from_bolt(BoltType::Node(bad)), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_query_binds_every_parameter() {
        assert!(bolt_query("RETURN $a, $b", params! { "a" => 1, "b" => "two" }).is_ok());
        let nested = params! { "n" => Node::new(NodeId(1), vec![], PropertyMap::new()) };
        assert!(bolt_query("RETURN $n", nested).is_err());
    }
}
