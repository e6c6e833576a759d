//! Result records.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{FromValue, PropertyMap, Value};
use crate::{Error, Result};

/// One row of a query result: an ordered set of named values.
///
/// The column names are shared between all records of one result.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(keys: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(keys.len(), values.len());
        Self { keys, values }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value of a column.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|idx| &self.values[idx])
    }

    /// Get a typed value from the record.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let val = self.value(key)
            .ok_or_else(|| Error::NotFound(format!("Column '{key}'")))?;
        T::from_value(val)
    }

    /// Deserialize a column into any serde type. Node and relationship
    /// columns deserialize from their property maps.
    pub fn deserialize<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let val = self.value(key)
            .ok_or_else(|| Error::NotFound(format!("Column '{key}'")))?;
        serde_json::from_value(val.to_json())
            .map_err(|e| Error::Mapping(format!("column '{key}': {e}")))
    }

    /// Column name → value map.
    pub fn to_map(&self) -> PropertyMap {
        self.keys.iter().cloned().zip(self.values.iter().cloned()).collect()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
