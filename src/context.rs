//! # Database Context
//!
//! `DatabaseContext` owns a driver handle, exactly one session, and at most
//! one in-flight transaction. Queries route through the active transaction
//! when there is one and through the session (auto-commit) otherwise.
//!
//! Two ways to run a transaction:
//!
//! | Method | Who commits | Action receives |
//! |--------|-------------|-----------------|
//! | `begin_transaction` | the context: commit on `Ok`, rollback on `Err` | `&mut DatabaseContext` |
//! | `begin_transaction_with` | the caller | `&mut ActiveTransaction` |
//!
//! Every method that touches the transaction slot takes `&mut self`, so two
//! transactions can never be started concurrently on one context.
//!
//! An auto-managed transaction is tied to the `begin_transaction` call that
//! opened it. If that future is dropped (a `tokio::time::timeout`, a losing
//! `select!` branch) the transaction is abandoned: the context stops
//! reporting it and rolls it back before its next query or transaction.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::config::Neo4jOptions;
use crate::driver::{Driver, MemoryDriver, RecordStream, Session, SessionConfig, Transaction};
use crate::model::{PropertyMap, Record};
use crate::tx::{TransactionConfig, TxId};
use crate::{Error, Result};

/// Transaction type of a driver's sessions.
pub type TxOf<D> = <<D as Driver>::Session as Session>::Tx;

// ============================================================================
// ActiveTransaction
// ============================================================================

/// The transaction held in a context's slot.
///
/// Closing it through [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) leaves a closed handle behind; the context
/// clears closed handles from its slot.
pub struct ActiveTransaction<T: Transaction> {
    inner: Option<T>,
    id: TxId,
    /// Set for auto-managed transactions; dead once the owning call is gone.
    owner: Option<Weak<()>>,
}

/// Held by the call that runs an auto-managed transaction.
pub(crate) struct TransactionLease {
    _owner: Arc<()>,
}

impl<T: Transaction> ActiveTransaction<T> {
    fn new(tx: T, owner: Option<Weak<()>>) -> Self {
        Self { id: tx.id(), inner: Some(tx), owner }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    /// False once committed or rolled back.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn is_abandoned(&self) -> bool {
        self.owner.as_ref().is_some_and(|owner| owner.strong_count() == 0)
    }

    fn is_live(&self) -> bool {
        self.is_open() && !self.is_abandoned()
    }

    /// Run a query inside this transaction.
    pub async fn run(&mut self, query: &str, params: impl Into<PropertyMap>) -> Result<Vec<Record>> {
        Ok(self.run_stream(query, params.into()).await?.into_records())
    }

    async fn run_stream(&mut self, query: &str, params: PropertyMap) -> Result<RecordStream> {
        let tx = self.inner.as_mut().ok_or(Error::TransactionClosed)?;
        tx.run(query, params).await
    }

    pub async fn commit(&mut self) -> Result<()> {
        let tx = self.inner.take().ok_or(Error::TransactionClosed)?;
        tx.commit().await?;
        debug!(id = %self.id, "transaction committed");
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let tx = self.inner.take().ok_or(Error::TransactionClosed)?;
        tx.rollback().await?;
        debug!(id = %self.id, "transaction rolled back");
        Ok(())
    }
}

impl<T: Transaction> fmt::Debug for ActiveTransaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTransaction")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

// ============================================================================
// DatabaseContext
// ============================================================================

/// Transaction-scoped execution context.
pub struct DatabaseContext<D: Driver = MemoryDriver> {
    driver: Arc<D>,
    session: D::Session,
    transaction: Option<ActiveTransaction<TxOf<D>>>,
}

impl<D: Driver> DatabaseContext<D> {
    /// Open a session on `driver` and wrap it.
    pub async fn open(driver: Arc<D>, config: SessionConfig) -> Result<Self> {
        let session = driver.session(config).await?;
        debug!(database = session.database(), "database context opened");
        Ok(Self {
            driver,
            session,
            transaction: None,
        })
    }

    /// Connect a new driver from options and open a context on it.
    pub async fn from_options(options: &Neo4jOptions) -> Result<Self> {
        let driver = Arc::new(D::connect(&options.url, options.auth())?);
        Self::open(driver, options.session_config()).await
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn session(&self) -> &D::Session {
        &self.session
    }

    /// True while a transaction occupies the slot.
    pub fn in_transaction(&self) -> bool {
        self.transaction.as_ref().is_some_and(ActiveTransaction::is_live)
    }

    /// The active transaction, if any.
    pub fn transaction(&self) -> Option<&ActiveTransaction<TxOf<D>>> {
        self.transaction.as_ref().filter(|t| t.is_live())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run a query and materialize every record.
    pub async fn run_query(&mut self, query: &str, params: impl Into<PropertyMap>) -> Result<Vec<Record>> {
        Ok(self.run_stream(query, params.into()).await?.into_records())
    }

    /// Run a query and map each record.
    pub async fn run_query_map<T, F>(&mut self, query: &str, params: impl Into<PropertyMap>, map: F) -> Result<Vec<T>>
    where
        F: FnMut(Record) -> Result<T>,
    {
        self.run_stream(query, params.into()).await?.map(map).collect()
    }

    /// Like [`run_query`](Self::run_query), but gives up with
    /// `Error::Cancelled` as soon as `cancel` completes.
    pub async fn run_query_until<C>(&mut self, query: &str, params: impl Into<PropertyMap>, cancel: C) -> Result<Vec<Record>>
    where
        C: Future<Output = ()>,
    {
        let params = params.into();
        tokio::select! {
            biased;
            _ = cancel => {
                debug!(query, "query cancelled");
                Err(Error::Cancelled)
            }
            result = self.run_query(query, params) => result,
        }
    }

    /// Run a query and keep the update counters alongside the records.
    pub(crate) async fn run_stream(&mut self, query: &str, params: PropertyMap) -> Result<RecordStream> {
        self.settle_transaction().await;
        match self.transaction.as_mut() {
            Some(active) => active.run_stream(query, params).await,
            None => self.session.run(query, params).await,
        }
    }

    pub(crate) fn clear_closed_transaction(&mut self) {
        if self.transaction.as_ref().is_some_and(|t| !t.is_open()) {
            self.transaction = None;
        }
    }

    /// Empty the slot of a closed handle, or of a transaction whose
    /// `begin_transaction` call was dropped before it could finish.
    async fn settle_transaction(&mut self) {
        self.clear_closed_transaction();
        if !self.transaction.as_ref().is_some_and(ActiveTransaction::is_abandoned) {
            return;
        }
        if let Some(mut active) = self.transaction.take() {
            warn!(id = %active.id(), "rolling back transaction abandoned by a dropped begin_transaction");
            if let Err(err) = active.rollback().await {
                warn!(id = %active.id(), error = %err, "rollback of abandoned transaction failed");
            }
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run `action` inside a transaction the context manages: commit when
    /// it returns `Ok`, roll back when it returns `Err`. The error comes
    /// back unchanged and the slot is empty afterwards.
    ///
    /// ```rust,no_run
    /// # use neo4j_berries_ogm::{DatabaseContext, Error, TransactionConfig, params};
    /// # async fn example(db: &mut DatabaseContext) -> Result<(), Error> {
    /// db.begin_transaction(TransactionConfig::default(), |db| Box::pin(async move {
    ///     db.run_query("CREATE (:Movie {title: $t})", params! { "t" => "Alien" }).await?;
    ///     db.run_query("CREATE (:Movie {title: $t})", params! { "t" => "Aliens" }).await?;
    ///     Ok::<_, Error>(())
    /// })).await
    /// # }
    /// ```
    pub async fn begin_transaction<T, E, F>(&mut self, config: TransactionConfig, action: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut Self) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<Error> + fmt::Debug,
    {
        let lease = self.open_managed_transaction(config).await?;
        let outcome = action(self).await;
        let result = self.finish_transaction(outcome).await;
        drop(lease);
        result
    }

    /// Open a transaction and hand it to `action`. The context neither
    /// commits nor rolls back: a transaction the action closes is cleared
    /// from the slot, one left open stays active until
    /// [`commit_transaction`](Self::commit_transaction) or
    /// [`rollback_transaction`](Self::rollback_transaction).
    pub async fn begin_transaction_with<T, E, F>(&mut self, config: TransactionConfig, action: F) -> std::result::Result<T, E>
    where
        F: for<'t> FnOnce(&'t mut ActiveTransaction<TxOf<D>>) -> BoxFuture<'t, std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.open_transaction(config).await?;
        let outcome = match self.transaction_slot() {
            Some(active) => action(active).await,
            None => Err(Error::NoActiveTransaction.into()),
        };
        self.clear_closed_transaction();
        outcome
    }

    pub(crate) fn transaction_slot(&mut self) -> Option<&mut ActiveTransaction<TxOf<D>>> {
        self.transaction.as_mut()
    }

    /// Commit the transaction left open by `begin_transaction_with`.
    pub async fn commit_transaction(&mut self) -> Result<()> {
        let mut active = self.take_open_transaction().await?;
        active.commit().await
    }

    /// Roll back the transaction left open by `begin_transaction_with`.
    pub async fn rollback_transaction(&mut self) -> Result<()> {
        let mut active = self.take_open_transaction().await?;
        active.rollback().await
    }

    async fn take_open_transaction(&mut self) -> Result<ActiveTransaction<TxOf<D>>> {
        self.settle_transaction().await;
        self.transaction.take().ok_or(Error::NoActiveTransaction)
    }

    /// Begin a caller-managed transaction and store it in the slot. A second
    /// transaction on the session is rejected by the driver.
    pub(crate) async fn open_transaction(&mut self, config: TransactionConfig) -> Result<()> {
        self.start_transaction(config, None).await
    }

    /// Begin an auto-managed transaction. It stays live only while the
    /// returned lease is held.
    pub(crate) async fn open_managed_transaction(&mut self, config: TransactionConfig) -> Result<TransactionLease> {
        let owner = Arc::new(());
        self.start_transaction(config, Some(Arc::downgrade(&owner))).await?;
        Ok(TransactionLease { _owner: owner })
    }

    async fn start_transaction(&mut self, config: TransactionConfig, owner: Option<Weak<()>>) -> Result<()> {
        self.settle_transaction().await;
        let tx = self.session.begin_transaction(config).await?;
        debug!(id = %tx.id(), database = self.session.database(), "transaction started");
        self.transaction = Some(ActiveTransaction::new(tx, owner));
        Ok(())
    }

    /// Commit on `Ok`, roll back on `Err`, always leaving the slot empty.
    ///
    /// If the rollback itself fails, its error is returned and the action's
    /// error is logged.
    pub(crate) async fn finish_transaction<T, E>(&mut self, outcome: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<Error> + fmt::Debug,
    {
        let Some(mut active) = self.transaction.take().filter(ActiveTransaction::is_open) else {
            // The action closed the transaction itself.
            return outcome;
        };

        match outcome {
            Ok(value) => {
                active.commit().await?;
                Ok(value)
            }
            Err(err) => match active.rollback().await {
                Ok(()) => Err(err),
                Err(rollback_err) => {
                    warn!(id = %active.id(), action_error = ?err, "rollback failed after action error");
                    Err(rollback_err.into())
                }
            },
        }
    }

    /// Close the session, rolling back a transaction that is still open.
    pub async fn close(mut self) -> Result<()> {
        let rollback = match self.take_open_transaction().await {
            Ok(mut active) => {
                warn!(id = %active.id(), "closing context with an open transaction; rolling back");
                active.rollback().await
            }
            Err(_) => Ok(()),
        };
        let closed = self.session.close().await;
        debug!(database = self.session.database(), "database context closed");
        rollback.and(closed)
    }
}

impl<D: Driver> fmt::Debug for DatabaseContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("database", &self.session.database())
            .field("transaction", &self.transaction)
            .finish()
    }
}
