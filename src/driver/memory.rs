//! Embedded in-process graph server and its driver.
//!
//! A `MemoryServer` registers itself under a name in a process-wide
//! registry; `MemoryDriver::connect("memory://<name>", ..)` resolves that
//! name whenever a session is opened, so every driver built from the same
//! URL sees the same data, like clients of one server.
//!
//! Auto-commit runs execute against a working copy of the committed graph
//! under the database write lock and are applied only if they succeed.
//! Explicit transactions work on a private snapshot which commit publishes;
//! a writing transaction fails with `TransactionConflict` when another
//! commit landed after its snapshot was taken.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::{AuthToken, Driver, RecordStream, Session, SessionConfig, Transaction};
use crate::cypher;
use crate::execution;
use crate::model::PropertyMap;
use crate::storage::{DEFAULT_DATABASE, Database, MemoryGraph};
use crate::tx::{AccessMode, TransactionConfig, TxId};
use crate::{Error, Result};

const URL_SCHEME: &str = "memory://";

static SERVERS: LazyLock<Mutex<HashMap<String, Arc<ServerState>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

struct ServerState {
    name: String,
    /// `None` disables authentication.
    credentials: Option<(String, String)>,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    next_tx_id: AtomicU64,
}

impl ServerState {
    fn database(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DatabaseNotFound(name.to_string()))
    }

    fn authenticate(&self, auth: &AuthToken) -> Result<()> {
        let Some((user, password)) = &self.credentials else {
            return Ok(());
        };
        match auth {
            AuthToken::Basic { username, password: given } if username == user && given == password => Ok(()),
            AuthToken::Basic { username, .. } => Err(Error::AuthenticationFailed(format!(
                "invalid credentials for user '{username}'"
            ))),
            AuthToken::None => Err(Error::AuthenticationFailed(
                "server requires basic authentication".into(),
            )),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// A running embedded server. Dropping it deregisters the instance; open
/// sessions keep working on the databases they already hold.
pub struct MemoryServer {
    state: Arc<ServerState>,
}

/// Builder for [`MemoryServer`].
#[derive(Debug, Default)]
pub struct MemoryServerBuilder {
    credentials: Option<(String, String)>,
    databases: Vec<String>,
}

impl MemoryServerBuilder {
    /// Require basic authentication with these credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Create an additional named database (`neo4j` always exists).
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.databases.push(name.into());
        self
    }

    /// Register the server under `name`. Fails if the name is taken.
    pub fn start(self, name: impl Into<String>) -> Result<MemoryServer> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(Error::Config(format!("invalid server name '{name}'")));
        }

        let mut databases = HashMap::new();
        for db in std::iter::once(DEFAULT_DATABASE.to_string()).chain(self.databases) {
            databases.insert(db.clone(), Arc::new(Database::new(db)));
        }
        let state = Arc::new(ServerState {
            name: name.clone(),
            credentials: self.credentials,
            databases: RwLock::new(databases),
            next_tx_id: AtomicU64::new(1),
        });

        let mut servers = SERVERS.lock();
        if servers.contains_key(&name) {
            return Err(Error::Config(format!("a server named '{name}' is already running")));
        }
        servers.insert(name.clone(), Arc::clone(&state));
        info!(server = %name, "embedded graph server started");
        Ok(MemoryServer { state })
    }
}

impl MemoryServer {
    pub fn builder() -> MemoryServerBuilder {
        MemoryServerBuilder::default()
    }

    /// Start a server without authentication and with only the default
    /// database.
    pub fn start(name: impl Into<String>) -> Result<Self> {
        Self::builder().start(name)
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// The URL drivers connect to.
    pub fn url(&self) -> String {
        format!("{URL_SCHEME}{}", self.state.name)
    }

    /// Create a database. Returns false if it already exists.
    pub fn create_database(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        let mut dbs = self.state.databases.write();
        if dbs.contains_key(&name) {
            return false;
        }
        dbs.insert(name.clone(), Arc::new(Database::new(name)));
        true
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.databases.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for MemoryServer {
    fn drop(&mut self) {
        let mut servers = SERVERS.lock();
        if servers
            .get(&self.state.name)
            .is_some_and(|registered| Arc::ptr_eq(registered, &self.state))
        {
            servers.remove(&self.state.name);
            info!(server = %self.state.name, "embedded graph server stopped");
        }
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer")
            .field("name", &self.state.name)
            .field("databases", &self.database_names())
            .finish()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Driver for `memory://` URLs.
#[derive(Debug)]
pub struct MemoryDriver {
    server: String,
    auth: AuthToken,
    closed: AtomicBool,
}

impl MemoryDriver {
    fn resolve(&self) -> Result<Arc<ServerState>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ServiceUnavailable("driver has been closed".into()));
        }
        let state = SERVERS
            .lock()
            .get(&self.server)
            .cloned()
            .ok_or_else(|| Error::ServiceUnavailable(format!("no server running at {URL_SCHEME}{}", self.server)))?;
        state.authenticate(&self.auth)?;
        Ok(state)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Session = MemorySession;

    fn connect(url: &str, auth: AuthToken) -> Result<Self> {
        let server = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| Error::Config(format!("unsupported URL '{url}', expected {URL_SCHEME}<instance>")))?
            .trim_end_matches('/');
        if server.is_empty() {
            return Err(Error::Config(format!("URL '{url}' names no instance")));
        }
        debug!(server, "memory driver created");
        Ok(Self {
            server: server.to_string(),
            auth,
            closed: AtomicBool::new(false),
        })
    }

    async fn session(&self, config: SessionConfig) -> Result<MemorySession> {
        let server = self.resolve()?;
        let name = config.database.as_deref().unwrap_or(DEFAULT_DATABASE);
        let database = server.database(name)?;
        debug!(server = %server.name, database = name, "session opened");
        Ok(MemorySession {
            server,
            database,
            access_mode: config.access_mode,
            tx_open: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        })
    }

    async fn verify_connectivity(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(server = %self.server, "memory driver closed");
        }
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct MemorySession {
    server: Arc<ServerState>,
    database: Arc<Database>,
    access_mode: AccessMode,
    /// Shared with the open transaction, which clears it when it ends.
    tx_open: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }
}

fn check_access(query: &cypher::ast::Query, mode: AccessMode) -> Result<()> {
    if mode == AccessMode::Read && query.mutates() {
        return Err(Error::ExecutionError(
            "writing in read access mode is not allowed".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Session for MemorySession {
    type Tx = MemoryTransaction;

    fn database(&self) -> &str {
        self.database.name()
    }

    async fn run(&self, query: &str, params: PropertyMap) -> Result<RecordStream> {
        self.ensure_open()?;
        if self.tx_open.load(Ordering::Acquire) {
            return Err(Error::TransactionAlreadyOpen);
        }
        debug!(database = self.database.name(), query, "auto-commit run");

        let stmt = cypher::parse(query)?;
        check_access(&stmt, self.access_mode)?;
        let result = self.database.apply(|graph| {
            let result = execution::execute(graph, &stmt, &params)?;
            let wrote = result.stats.contains_updates();
            Ok((result, wrote))
        })?;
        Ok(RecordStream::from(result))
    }

    async fn begin_transaction(&self, config: TransactionConfig) -> Result<MemoryTransaction> {
        self.ensure_open()?;
        if self
            .tx_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::TransactionAlreadyOpen);
        }

        let id = TxId(self.server.next_tx_id.fetch_add(1, Ordering::Relaxed));
        let (graph, base_version) = self.database.snapshot();
        debug!(%id, database = self.database.name(), base_version, metadata = ?config.metadata, "transaction begun");
        Ok(MemoryTransaction {
            id,
            database: Arc::clone(&self.database),
            graph,
            base_version,
            dirty: false,
            failed: false,
            started: Instant::now(),
            timeout: config.timeout,
            access_mode: self.access_mode,
            session_tx_open: Arc::clone(&self.tx_open),
        })
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(database = self.database.name(), "session closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("server", &self.server.name)
            .field("database", &self.database.name())
            .field("access_mode", &self.access_mode)
            .field("tx_open", &self.tx_open.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Snapshot transaction. Dropping it without commit discards its writes.
#[derive(Debug)]
pub struct MemoryTransaction {
    id: TxId,
    database: Arc<Database>,
    graph: MemoryGraph,
    base_version: u64,
    dirty: bool,
    /// Set when a statement fails; the transaction can then only roll back.
    failed: bool,
    started: Instant,
    timeout: Option<Duration>,
    access_mode: AccessMode,
    session_tx_open: Arc<AtomicBool>,
}

impl MemoryTransaction {
    fn check_timeout(&self) -> Result<()> {
        match self.timeout {
            Some(timeout) if self.started.elapsed() > timeout => Err(Error::TransactionTimedOut(timeout)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> TxId {
        self.id
    }

    async fn run(&mut self, query: &str, params: PropertyMap) -> Result<RecordStream> {
        if self.failed {
            return Err(Error::TransactionFailed(format!(
                "{} was terminated by an earlier error and can only be rolled back",
                self.id
            )));
        }
        if let Err(e) = self.check_timeout() {
            self.failed = true;
            return Err(e);
        }
        debug!(id = %self.id, query, "transaction run");

        let outcome = cypher::parse(query)
            .and_then(|stmt| {
                check_access(&stmt, self.access_mode)?;
                execution::execute(&mut self.graph, &stmt, &params)
            });
        match outcome {
            Ok(result) => {
                self.dirty |= result.stats.contains_updates();
                Ok(RecordStream::from(result))
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    async fn commit(mut self) -> Result<()> {
        if self.failed {
            return Err(Error::TransactionFailed(format!(
                "{} cannot commit after an earlier error",
                self.id
            )));
        }
        self.check_timeout()?;
        if self.dirty {
            let graph = std::mem::take(&mut self.graph);
            let version = self.database.publish(graph, self.base_version)?;
            debug!(id = %self.id, version, "transaction committed");
        } else {
            debug!(id = %self.id, "read-only transaction committed");
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(id = %self.id, dirty = self.dirty, "transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.session_tx_open.store(false, Ordering::Release);
    }
}
