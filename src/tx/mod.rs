//! Transaction identifiers, access modes and per-transaction settings.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{PropertyMap, Value};

/// Session access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Settings applied when a transaction begins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionConfig {
    /// Runs and commits after this much time fail with
    /// `Error::TransactionTimedOut`.
    pub timeout: Option<Duration>,
    /// Free-form metadata attached to the transaction (logged at begin).
    pub metadata: PropertyMap,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
