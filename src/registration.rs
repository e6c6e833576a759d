//! # Registration
//!
//! Wires one process-wide [`Neo4jSingletonContext`] (options + driver) and
//! hands out a fresh application context per unit of work.
//!
//! ```rust,no_run
//! use neo4j_berries_ogm::{add_neo4j, DatabaseContext, GraphContext, MemoryDriver, Neo4jOptions, PropertyMap};
//!
//! struct AppContext {
//!     db: DatabaseContext<MemoryDriver>,
//! }
//!
//! impl GraphContext for AppContext {
//!     type Driver = MemoryDriver;
//!     fn from_database(db: DatabaseContext<MemoryDriver>) -> Self {
//!         Self { db }
//!     }
//!     fn database(&mut self) -> &mut DatabaseContext<MemoryDriver> {
//!         &mut self.db
//!     }
//! }
//!
//! # async fn example() -> neo4j_berries_ogm::Result<()> {
//! let services = add_neo4j::<AppContext>(|builder| {
//!     builder.use_options(Neo4jOptions::new("memory://app"));
//!     Ok(())
//! })?;
//! let mut ctx = services.scope().await?;
//! ctx.database().run_query("RETURN 1 AS one", PropertyMap::new()).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::info;

use crate::config::Neo4jOptions;
use crate::context::DatabaseContext;
use crate::driver::Driver;
use crate::tx::AccessMode;
use crate::{Error, Result};

/// An application context built on top of a [`DatabaseContext`].
///
/// Implementors typically also hold `NodeSet` descriptors for their
/// entities.
pub trait GraphContext: Sized + Send + 'static {
    type Driver: Driver;

    fn from_database(database: DatabaseContext<Self::Driver>) -> Self;

    fn database(&mut self) -> &mut DatabaseContext<Self::Driver>;
}

// ============================================================================
// Configuration builder
// ============================================================================

/// Collects the options passed to [`add_neo4j`].
#[derive(Debug, Default)]
pub struct OgmConfigurationBuilder {
    options: Option<Neo4jOptions>,
    access_mode: Option<AccessMode>,
}

impl OgmConfigurationBuilder {
    pub fn use_options(&mut self, options: Neo4jOptions) -> &mut Self {
        self.options = Some(options);
        self
    }

    /// Read options from a section of a configuration tree.
    pub fn use_section(&mut self, root: &serde_json::Value, path: &str) -> Result<&mut Self> {
        self.options = Some(Neo4jOptions::from_section(root, path)?);
        Ok(self)
    }

    /// Read options from `NEO4J_*` environment variables.
    pub fn use_environment(&mut self) -> Result<&mut Self> {
        self.options = Some(Neo4jOptions::from_env()?);
        Ok(self)
    }

    /// Override the access mode of every scoped session.
    pub fn access_mode(&mut self, mode: AccessMode) -> &mut Self {
        self.access_mode = Some(mode);
        self
    }

    fn build(self) -> Result<Neo4jOptions> {
        let mut options = self
            .options
            .ok_or_else(|| Error::Config("no Neo4j options configured".into()))?;
        if let Some(mode) = self.access_mode {
            options.access_mode = mode;
        }
        Ok(options)
    }
}

// ============================================================================
// Singleton
// ============================================================================

/// Options and driver shared by every scope.
pub struct Neo4jSingletonContext<D: Driver> {
    options: Neo4jOptions,
    driver: Arc<D>,
}

impl<D: Driver> Neo4jSingletonContext<D> {
    pub fn new(builder: OgmConfigurationBuilder) -> Result<Self> {
        let options = builder.build()?;
        let driver = Arc::new(D::connect(&options.url, options.auth())?);
        info!(url = %options.url, database = ?options.database, "graph driver registered");
        Ok(Self { options, driver })
    }

    pub fn options(&self) -> &Neo4jOptions {
        &self.options
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }
}

impl<D: Driver> fmt::Debug for Neo4jSingletonContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jSingletonContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Services
// ============================================================================

/// The registered services: one singleton, many scopes.
pub struct Neo4jServices<C: GraphContext> {
    singleton: Arc<Neo4jSingletonContext<C::Driver>>,
    _context: PhantomData<fn() -> C>,
}

impl<C: GraphContext> Clone for Neo4jServices<C> {
    fn clone(&self) -> Self {
        Self {
            singleton: Arc::clone(&self.singleton),
            _context: PhantomData,
        }
    }
}

impl<C: GraphContext> Neo4jServices<C> {
    pub fn singleton(&self) -> &Neo4jSingletonContext<C::Driver> {
        &self.singleton
    }

    /// Open a session on the shared driver and build a new `C` around it.
    pub async fn scope(&self) -> Result<C> {
        let database = DatabaseContext::open(
            Arc::clone(&self.singleton.driver),
            self.singleton.options.session_config(),
        )
        .await?;
        Ok(C::from_database(database))
    }

    /// Close the shared driver. Scopes opened afterwards fail.
    pub async fn shutdown(&self) -> Result<()> {
        info!(url = %self.singleton.options.url, "graph driver shut down");
        self.singleton.driver.close().await
    }
}

/// Register `C`: build options with `configure`, connect the driver once
/// and return the services that hand out `C` instances.
pub fn add_neo4j<C: GraphContext>(
    configure: impl FnOnce(&mut OgmConfigurationBuilder) -> Result<()>,
) -> Result<Neo4jServices<C>> {
    let mut builder = OgmConfigurationBuilder::default();
    configure(&mut builder)?;
    Ok(Neo4jServices {
        singleton: Arc::new(Neo4jSingletonContext::new(builder)?),
        _context: PhantomData,
    })
}
