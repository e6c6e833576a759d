//! # Entity Sets
//!
//! A [`NodeSet<T>`] turns create/read/update/delete calls for one entity
//! type into parameterized Cypher and runs it through a
//! [`DatabaseContext`], so every call joins the context's active
//! transaction when there is one.
//!
//! | Call | Cypher |
//! |------|--------|
//! | `add` | `CREATE (n:Label $props)` |
//! | `all` / `find` / `first` | `MATCH (n:Label) WHERE .. RETURN n` |
//! | `update` | `MATCH .. SET n.k = $v .. RETURN count(n)` |
//! | `remove` | `MATCH .. DETACH DELETE n RETURN count(n)` |
//! | `count` | `MATCH (n:Label) RETURN count(n)` |
//!
//! Filters are property equality maps; a `Null` filter value matches nodes
//! without that property.

use std::fmt::{self, Write as _};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::context::DatabaseContext;
use crate::driver::Driver;
use crate::model::{PropertyMap, Value};
use crate::tx::TransactionConfig;
use crate::{Error, Result};

/// A struct stored as a node with label [`LABEL`](Self::LABEL).
///
/// Fields serialize to node properties; `None` fields are not stored.
pub trait NodeEntity: Serialize + DeserializeOwned + Send + Sync {
    const LABEL: &'static str;
}

/// Set of all `T` nodes in the database.
pub struct NodeSet<T: NodeEntity> {
    _entity: PhantomData<fn() -> T>,
}

impl<T: NodeEntity> NodeSet<T> {
    pub fn new() -> Self {
        Self { _entity: PhantomData }
    }

    pub fn label(&self) -> &'static str {
        T::LABEL
    }

    fn match_clause(filter: &PropertyMap, params: &mut PropertyMap) -> Result<String> {
        let mut query = format!("MATCH (n:{})", quote_label(T::LABEL)?);
        query.push_str(&where_clause("n", "f", filter, params));
        Ok(query)
    }

    /// Create one node.
    pub async fn add<D: Driver>(&self, db: &mut DatabaseContext<D>, entity: &T) -> Result<()> {
        let query = format!("CREATE (n:{} $props)", quote_label(T::LABEL)?);
        let props = entity_properties(entity)?;
        db.run_query(&query, PropertyMap::from([("props".to_string(), Value::Map(props))])).await?;
        Ok(())
    }

    /// Create several nodes. Outside a transaction the batch runs in its
    /// own transaction, so either all nodes are created or none.
    pub async fn add_range<'e, D: Driver>(
        &self,
        db: &mut DatabaseContext<D>,
        entities: impl IntoIterator<Item = &'e T>,
    ) -> Result<u64>
    where
        T: 'e,
    {
        let query = format!("CREATE (n:{} $props)", quote_label(T::LABEL)?);
        let batch = entities
            .into_iter()
            .map(|entity| entity_properties(entity).map(|props| PropertyMap::from([("props".to_string(), Value::Map(props))])))
            .collect::<Result<Vec<_>>>()?;
        let created = batch.len() as u64;
        debug!(label = T::LABEL, count = created, "adding nodes");

        if db.in_transaction() {
            run_batch(db, &query, batch).await?;
        } else {
            db.begin_transaction(TransactionConfig::new(), |db| {
                Box::pin(async move { run_batch(db, &query, batch).await })
            })
            .await?;
        }
        Ok(created)
    }

    /// Every `T` node.
    pub async fn all<D: Driver>(&self, db: &mut DatabaseContext<D>) -> Result<Vec<T>> {
        self.find(db, PropertyMap::new()).await
    }

    /// Nodes whose properties equal every entry of `filter`.
    pub async fn find<D: Driver>(&self, db: &mut DatabaseContext<D>, filter: PropertyMap) -> Result<Vec<T>> {
        let mut params = PropertyMap::new();
        let query = format!("{} RETURN n", Self::match_clause(&filter, &mut params)?);
        db.run_query_map(&query, params, |record| record.deserialize::<T>("n")).await
    }

    /// First node matching `filter`, if any.
    pub async fn first<D: Driver>(&self, db: &mut DatabaseContext<D>, filter: PropertyMap) -> Result<Option<T>> {
        let mut params = PropertyMap::new();
        let query = format!("{} RETURN n LIMIT 1", Self::match_clause(&filter, &mut params)?);
        let mut found = db.run_query_map(&query, params, |record| record.deserialize::<T>("n")).await?;
        Ok(found.pop())
    }

    /// Set `changes` on every node matching `filter`. A `Null` change
    /// removes the property. Returns the number of nodes matched.
    ///
    /// Changes follow the same rule as entity fields: maps and graph
    /// values are rejected with `Error::Mapping` before anything runs.
    pub async fn update<D: Driver>(&self, db: &mut DatabaseContext<D>, filter: PropertyMap, changes: PropertyMap) -> Result<u64> {
        if changes.is_empty() {
            return Ok(0);
        }
        let mut params = PropertyMap::new();
        let mut query = Self::match_clause(&filter, &mut params)?;
        let mut keys = changes
            .into_iter()
            .map(|(key, value)| storable_property(key, value))
            .collect::<Result<Vec<_>>>()?;
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        for (i, (key, value)) in keys.into_iter().enumerate() {
            let param = format!("c{i}");
            let sep = if i == 0 { " SET " } else { ", " };
            let _ = write!(query, "{sep}n.{} = ${param}", quote_identifier(&key));
            params.insert(param, value);
        }
        query.push_str(" RETURN count(n) AS updated");
        count_column(db, &query, params, "updated").await
    }

    /// Delete every node matching `filter` along with its relationships.
    /// Returns the number of nodes deleted.
    pub async fn remove<D: Driver>(&self, db: &mut DatabaseContext<D>, filter: PropertyMap) -> Result<u64> {
        let mut params = PropertyMap::new();
        let query = format!("{} DETACH DELETE n RETURN count(n) AS removed", Self::match_clause(&filter, &mut params)?);
        count_column(db, &query, params, "removed").await
    }

    pub async fn count<D: Driver>(&self, db: &mut DatabaseContext<D>) -> Result<u64> {
        let query = format!("MATCH (n:{}) RETURN count(n) AS total", quote_label(T::LABEL)?);
        count_column(db, &query, PropertyMap::new(), "total").await
    }
}

impl<T: NodeEntity> Default for NodeSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NodeEntity> Clone for NodeSet<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: NodeEntity> fmt::Debug for NodeSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeSet<{}>", T::LABEL)
    }
}

async fn run_batch<D: Driver>(db: &mut DatabaseContext<D>, query: &str, batch: Vec<PropertyMap>) -> Result<()> {
    for params in batch {
        db.run_query(query, params).await?;
    }
    Ok(())
}

async fn count_column<D: Driver>(db: &mut DatabaseContext<D>, query: &str, params: PropertyMap, column: &str) -> Result<u64> {
    let records = db.run_query(query, params).await?;
    match records.first() {
        Some(record) => record.get::<u64>(column),
        None => Ok(0),
    }
}

// ============================================================================
// Query building helpers
// ============================================================================

/// Back-tick quote a property key or variable name.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Labels and relationship types must be plain identifiers.
pub(crate) fn quote_label(label: &str) -> Result<String> {
    let mut chars = label.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::Mapping(format!("'{label}' is not a valid label or relationship type")));
    }
    Ok(quote_identifier(label))
}

/// ` WHERE alias.k = $prefix0 AND ..` for an equality filter, or an empty
/// string when the filter is empty. Keys are emitted in sorted order.
pub(crate) fn where_clause(alias: &str, prefix: &str, filter: &PropertyMap, params: &mut PropertyMap) -> String {
    let mut keys: Vec<&String> = filter.keys().collect();
    keys.sort();
    let mut out = String::new();
    for (i, key) in keys.into_iter().enumerate() {
        out.push_str(if i == 0 { " WHERE " } else { " AND " });
        let property = format!("{alias}.{}", quote_identifier(key));
        match &filter[key] {
            Value::Null => {
                let _ = write!(out, "{property} IS NULL");
            }
            value => {
                let param = format!("{prefix}{i}");
                let _ = write!(out, "{property} = ${param}");
                params.insert(param, value.clone());
            }
        }
    }
    out
}

/// Serialize an entity into node/relationship properties.
pub(crate) fn entity_properties<T: Serialize>(entity: &T) -> Result<PropertyMap> {
    match serde_json::to_value(entity)? {
        serde_json::Value::Object(fields) => fields
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(key, json)| storable_property(key, Value::try_from(json)?))
            .collect(),
        other => Err(Error::Mapping(format!("entity must serialize to an object, got {other}"))),
    }
}

fn storable_property(key: String, value: Value) -> Result<(String, Value)> {
    if !value.is_storable() {
        return Err(Error::Mapping(format!(
            "property '{key}' holds a {}; only scalars and flat lists can be stored",
            value.type_name()
        )));
    }
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Tagged {
        name: String,
        nickname: Option<String>,
        tags: Vec<String>,
    }

    #[test]
    fn test_where_clause_sorts_and_quotes() {
        let mut params = PropertyMap::new();
        let filter = params! { "year" => 1979, "title" => "Alien", "odd`key" => Value::Null };
        let clause = where_clause("n", "f", &filter, &mut params);
        assert_eq!(clause, " WHERE n.`odd``key` IS NULL AND n.`title` = $f1 AND n.`year` = $f2");
        assert_eq!(params, params! { "f1" => "Alien", "f2" => 1979 });
    }

    #[test]
    fn test_quote_label_rejects_injection() {
        assert_eq!(quote_label("Movie").unwrap(), "`Movie`");
        assert!(matches!(quote_label("Movie) DETACH DELETE (x"), Err(Error::Mapping(_))));
        assert!(matches!(quote_label(""), Err(Error::Mapping(_))));
        assert!(matches!(quote_label("9Lives"), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_entity_properties_skip_none() {
        let entity = Tagged { name: "Ripley".into(), nickname: None, tags: vec!["crew".into()] };
        let props = entity_properties(&entity).unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props["name"], Value::from("Ripley"));
        assert_eq!(props["tags"], Value::List(vec![Value::from("crew")]));

        assert!(matches!(entity_properties(&42), Err(Error::Mapping(_))));
        #[derive(Serialize)]
        struct Nested {
            inner: Tagged,
        }
        let nested = Nested { inner: entity };
        assert!(matches!(entity_properties(&nested), Err(Error::Mapping(_))));
    }

    #[test]
    fn test_entity_properties_reject_oversized_integers() {
        #[derive(Serialize)]
        struct Counter {
            hits: u64,
        }
        let small = entity_properties(&Counter { hits: 12 }).unwrap();
        assert_eq!(small["hits"], Value::Int(12));
        assert!(matches!(entity_properties(&Counter { hits: u64::MAX }), Err(Error::Mapping(_))));
    }
}
