//! Relation mapping: a source node, a relationship and a target node decoded
//! together from one record.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::DatabaseContext;
use crate::driver::Driver;
use crate::model::{PropertyMap, Record, Value};
use crate::sets::{entity_properties, quote_label, where_clause, NodeEntity};
use crate::Result;

/// A struct stored as a relationship of type [`TYPE`](Self::TYPE).
pub trait RelationshipEntity: Serialize + DeserializeOwned + Send + Sync {
    const TYPE: &'static str;
}

/// `(source_node)-[relationship]->(target_node)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRelation<S, R, T> {
    pub source_node: S,
    pub relationship: R,
    pub target_node: T,
}

impl<S, R, T> MappedRelation<S, R, T>
where
    S: DeserializeOwned,
    R: DeserializeOwned,
    T: DeserializeOwned,
{
    /// Decode the three named columns of `record`. Node and relationship
    /// columns deserialize from their properties.
    pub fn from_record(record: &Record, source_key: &str, relationship_key: &str, target_key: &str) -> Result<Self> {
        Ok(Self {
            source_node: record.deserialize(source_key)?,
            relationship: record.deserialize(relationship_key)?,
            target_node: record.deserialize(target_key)?,
        })
    }
}

impl<S, R, T> MappedRelation<S, R, T>
where
    S: NodeEntity,
    R: RelationshipEntity,
    T: NodeEntity,
{
    fn pattern() -> Result<String> {
        Ok(format!(
            "(s:{})-[r:{}]->(t:{})",
            quote_label(S::LABEL)?,
            quote_label(R::TYPE)?,
            quote_label(T::LABEL)?
        ))
    }

    /// Every `S -[R]-> T` triple in the database.
    pub async fn load_all<D: Driver>(db: &mut DatabaseContext<D>) -> Result<Vec<Self>> {
        let query = format!("MATCH {} RETURN s, r, t", Self::pattern()?);
        db.run_query_map(&query, PropertyMap::new(), |record| Self::from_record(&record, "s", "r", "t"))
            .await
    }

    /// Triples whose source matches `source_filter`.
    pub async fn load_from<D: Driver>(db: &mut DatabaseContext<D>, source_filter: PropertyMap) -> Result<Vec<Self>> {
        let mut params = PropertyMap::new();
        let query = format!(
            "MATCH {}{} RETURN s, r, t",
            Self::pattern()?,
            where_clause("s", "s", &source_filter, &mut params)
        );
        db.run_query_map(&query, params, |record| Self::from_record(&record, "s", "r", "t"))
            .await
    }

    /// Connect every source matching `source_filter` to every target
    /// matching `target_filter` with a copy of `relationship`. Returns the
    /// number of relationships created.
    pub async fn connect<D: Driver>(
        db: &mut DatabaseContext<D>,
        source_filter: PropertyMap,
        relationship: &R,
        target_filter: PropertyMap,
    ) -> Result<u64> {
        let mut params = PropertyMap::new();
        let source = where_clause("s", "s", &source_filter, &mut params);
        let target = where_clause("t", "t", &target_filter, &mut params);
        // Both filters share one WHERE; drop the second keyword.
        let conditions = match (source.is_empty(), target.strip_prefix(" WHERE ")) {
            (_, None) => source,
            (true, Some(rest)) => format!(" WHERE {rest}"),
            (false, Some(rest)) => format!("{source} AND {rest}"),
        };
        params.insert("props".into(), Value::Map(entity_properties(relationship)?));
        let query = format!(
            "MATCH (s:{}), (t:{}){conditions} CREATE (s)-[r:{} $props]->(t) RETURN count(r) AS created",
            quote_label(S::LABEL)?,
            quote_label(T::LABEL)?,
            quote_label(R::TYPE)?,
        );
        let records = db.run_query(&query, params).await?;
        match records.first() {
            Some(record) => record.get::<u64>("created"),
            None => Ok(0),
        }
    }
}
