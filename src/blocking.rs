//! # Blocking adapter
//!
//! [`BlockingDatabaseContext`] drives an async [`DatabaseContext`] on a
//! private current-thread tokio runtime. There is one implementation of the
//! transaction contract; this module only blocks on it.
//!
//! Do not create or drop a blocking context from inside an async runtime:
//! tokio refuses to block a runtime thread.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::config::Neo4jOptions;
use crate::context::{ActiveTransaction, DatabaseContext, TxOf};
use crate::driver::{Driver, MemoryDriver, SessionConfig};
use crate::model::{PropertyMap, Record};
use crate::tx::{TransactionConfig, TxId};
use crate::{Error, Result};

/// Synchronous facade over [`DatabaseContext`].
pub struct BlockingDatabaseContext<D: Driver = MemoryDriver> {
    inner: DatabaseContext<D>,
    runtime: Runtime,
}

fn runtime() -> Result<Runtime> {
    Builder::new_current_thread().enable_all().build().map_err(|e| Error::Config(e.to_string()))
}

impl<D: Driver> BlockingDatabaseContext<D> {
    pub fn open(driver: Arc<D>, config: SessionConfig) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(DatabaseContext::open(driver, config))?;
        Ok(Self { inner, runtime })
    }

    pub fn from_options(options: &Neo4jOptions) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(DatabaseContext::from_options(options))?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped async context.
    pub fn get_ref(&self) -> &DatabaseContext<D> {
        &self.inner
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    pub fn run_query(&mut self, query: &str, params: impl Into<PropertyMap>) -> Result<Vec<Record>> {
        self.runtime.block_on(self.inner.run_query(query, params))
    }

    pub fn run_query_map<T, F>(&mut self, query: &str, params: impl Into<PropertyMap>, map: F) -> Result<Vec<T>>
    where
        F: FnMut(Record) -> Result<T>,
    {
        self.runtime.block_on(self.inner.run_query_map(query, params, map))
    }

    /// Auto-managed transaction: commit on `Ok`, roll back on `Err`. If
    /// `action` panics, the transaction is rolled back on the next call.
    pub fn begin_transaction<T, E, F>(&mut self, config: TransactionConfig, action: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: From<Error> + fmt::Debug,
    {
        let lease = self.runtime.block_on(self.inner.open_managed_transaction(config))?;
        let outcome = action(self);
        let result = self.runtime.block_on(self.inner.finish_transaction(outcome));
        drop(lease);
        result
    }

    /// Caller-managed transaction; see
    /// [`DatabaseContext::begin_transaction_with`].
    pub fn begin_transaction_with<T, E, F>(&mut self, config: TransactionConfig, action: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut BlockingTransaction<'_, D>) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        self.runtime.block_on(self.inner.open_transaction(config))?;
        let outcome = match self.inner.transaction_slot() {
            Some(active) => action(&mut BlockingTransaction {
                inner: active,
                runtime: &self.runtime,
            }),
            None => Err(Error::NoActiveTransaction.into()),
        };
        self.inner.clear_closed_transaction();
        outcome
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.commit_transaction())
    }

    pub fn rollback_transaction(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.rollback_transaction())
    }

    pub fn close(self) -> Result<()> {
        let Self { inner, runtime } = self;
        runtime.block_on(inner.close())
    }
}

impl<D: Driver> fmt::Debug for BlockingDatabaseContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockingDatabaseContext").field(&self.inner).finish()
    }
}

/// Handle passed to a caller-managed blocking transaction.
pub struct BlockingTransaction<'a, D: Driver> {
    inner: &'a mut ActiveTransaction<TxOf<D>>,
    runtime: &'a Runtime,
}

impl<D: Driver> BlockingTransaction<'_, D> {
    pub fn id(&self) -> TxId {
        self.inner.id()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn run(&mut self, query: &str, params: impl Into<PropertyMap>) -> Result<Vec<Record>> {
        self.runtime.block_on(self.inner.run(query, params))
    }

    pub fn commit(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.commit())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.rollback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AuthToken, MemoryServer};
    use crate::params;

    fn open(server: &MemoryServer) -> BlockingDatabaseContext {
        let driver = Arc::new(MemoryDriver::connect(&server.url(), AuthToken::none()).unwrap());
        BlockingDatabaseContext::open(driver, SessionConfig::new()).unwrap()
    }

    #[test]
    fn test_blocking_auto_managed_rollback() {
        let server = MemoryServer::start("blocking-unit-rollback").unwrap();
        let mut db = open(&server);

        let result: Result<()> = db.begin_transaction(TransactionConfig::new(), |db| {
            db.run_query("CREATE (:Temp {n: $n})", params! { "n" => 1 })?;
            db.run_query("RETURN 1 / 0 AS boom", params! {})?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::ExecutionError(_))));
        assert!(!db.in_transaction());

        let rows = db.run_query("MATCH (t:Temp) RETURN count(t) AS c", params! {}).unwrap();
        assert_eq!(rows[0].get::<i64>("c").unwrap(), 0);
        db.close().unwrap();
    }

    #[test]
    fn test_panicking_action_abandons_transaction() {
        let server = MemoryServer::start("blocking-unit-panic").unwrap();
        let mut db = open(&server);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<()> = db.begin_transaction(TransactionConfig::new(), |db| {
                db.run_query("CREATE (:Ghost)", params! {})?;
                panic!("action blew up");
            });
        }));
        assert!(unwound.is_err());
        assert!(!db.in_transaction());

        db.run_query("CREATE (:Real)", params! {}).unwrap();
        let rows = db
            .run_query("MATCH (g:Ghost) RETURN count(g) AS ghosts", params! {})
            .unwrap();
        assert_eq!(rows[0].get::<i64>("ghosts").unwrap(), 0);

        let mut fresh = open(&server);
        let rows = fresh.run_query("MATCH (r:Real) RETURN count(r) AS c", params! {}).unwrap();
        assert_eq!(rows[0].get::<i64>("c").unwrap(), 1);
    }
}
