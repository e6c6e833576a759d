//! End-to-end tests for the Cypher subset, run through sessions and
//! transactions of the embedded driver.

use std::sync::Arc;

use neo4j_berries_ogm::{
    params, AccessMode, AuthToken, DatabaseContext, Driver, Error, MemoryDriver, MemoryServer, Node,
    PropertyMap, Session, SessionConfig, TransactionConfig, Value,
};
use pretty_assertions::assert_eq;
use serde::Deserialize;

const MOVIES: &str = "\
    CREATE (keanu:Person {name: 'Keanu Reeves', born: 1964}), \
           (carrie:Person {name: 'Carrie-Anne Moss', born: 1967}), \
           (lana:Person {name: 'Lana Wachowski', born: 1965}), \
           (matrix:Movie {title: 'The Matrix', released: 1999, tags: ['sci-fi', 'action']}), \
           (reloaded:Movie {title: 'The Matrix Reloaded', released: 2003}), \
           (wick:Movie {title: 'John Wick', released: 2014}), \
           (keanu)-[:ACTED_IN {roles: ['Neo']}]->(matrix), \
           (keanu)-[:ACTED_IN {roles: ['Neo']}]->(reloaded), \
           (keanu)-[:ACTED_IN {roles: ['John Wick']}]->(wick), \
           (carrie)-[:ACTED_IN {roles: ['Trinity']}]->(matrix), \
           (lana)-[:DIRECTED]->(matrix), \
           (lana)-[:DIRECTED]->(reloaded)";

async fn movie_db(name: &str) -> (MemoryServer, DatabaseContext<MemoryDriver>) {
    let server = MemoryServer::start(name).unwrap();
    let driver = Arc::new(MemoryDriver::connect(&server.url(), AuthToken::none()).unwrap());
    let mut db = DatabaseContext::open(driver, SessionConfig::new()).await.unwrap();
    db.run_query(MOVIES, PropertyMap::new()).await.unwrap();
    (server, db)
}

fn strings(records: &[neo4j_berries_ogm::Record], column: &str) -> Vec<String> {
    records.iter().map(|r| r.get::<String>(column).unwrap()).collect()
}

// ============================================================================
// 1. Reading
// ============================================================================

#[tokio::test]
async fn test_match_filter_and_order() {
    let (_server, mut db) = movie_db("cypher-filter").await;

    let rows = db
        .run_query(
            "MATCH (m:Movie) WHERE m.released >= $year AND NOT m.title ENDS WITH 'Wick' \
             RETURN m.title AS title ORDER BY m.released DESC",
            params! { "year" => 1999 },
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "title"), vec!["The Matrix Reloaded", "The Matrix"]);

    let rows = db
        .run_query(
            "MATCH (p:Person) WHERE p.name STARTS WITH 'Ca' OR p.born IN [1964] \
             RETURN p.name AS name ORDER BY name",
            PropertyMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "name"), vec!["Carrie-Anne Moss", "Keanu Reeves"]);
}

#[tokio::test]
async fn test_traversal_and_aggregation() {
    let (_server, mut db) = movie_db("cypher-traversal").await;

    let rows = db
        .run_query(
            "MATCH (p:Person)-[:ACTED_IN]->(m:Movie) \
             RETURN p.name AS actor, count(m) AS movies, collect(m.title) AS titles \
             ORDER BY movies DESC, actor",
            PropertyMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "actor"), vec!["Keanu Reeves", "Carrie-Anne Moss"]);
    assert_eq!(rows[0].get::<i64>("movies").unwrap(), 3);
    assert_eq!(rows[1].get::<Vec<String>>("titles").unwrap(), vec!["The Matrix"]);

    // Co-actors: the two ACTED_IN relationships of one match must differ.
    let rows = db
        .run_query(
            "MATCH (a:Person)-[:ACTED_IN]->(m)<-[:ACTED_IN]-(b:Person) \
             RETURN a.name AS a, b.name AS b ORDER BY a",
            PropertyMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "a"), vec!["Carrie-Anne Moss", "Keanu Reeves"]);
    assert_eq!(strings(&rows, "b"), vec!["Keanu Reeves", "Carrie-Anne Moss"]);
}

#[tokio::test]
async fn test_optional_match_and_functions() {
    let (_server, mut db) = movie_db("cypher-functions").await;

    let rows = db
        .run_query(
            "MATCH (m:Movie) OPTIONAL MATCH (d:Person)-[:DIRECTED]->(m) \
             RETURN m.title AS title, coalesce(d.name, 'unknown') AS director, \
                    size(coalesce(m.tags, [])) AS tag_count, toUpper(m.title) AS shout \
             ORDER BY title",
            PropertyMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "director"), vec!["unknown", "Lana Wachowski", "Lana Wachowski"]);
    assert_eq!(rows[1].get::<i64>("tag_count").unwrap(), 2);
    assert_eq!(rows[0].get::<String>("shout").unwrap(), "JOHN WICK");
}

#[tokio::test]
async fn test_distinct_and_paging() {
    let (_server, mut db) = movie_db("cypher-paging").await;

    let rows = db
        .run_query(
            "MATCH (:Person)-[r]->(:Movie) RETURN DISTINCT type(r) AS kind ORDER BY kind",
            PropertyMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "kind"), vec!["ACTED_IN", "DIRECTED"]);

    let rows = db
        .run_query(
            "MATCH (m:Movie) RETURN m.title AS title ORDER BY m.released SKIP $skip LIMIT $limit",
            params! { "skip" => 1, "limit" => 1 },
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "title"), vec!["The Matrix Reloaded"]);
}

#[tokio::test]
async fn test_records_deserialize_into_structs() {
    #[derive(Debug, PartialEq, Deserialize)]
    struct Movie {
        title: String,
        released: i64,
        #[serde(default)]
        tags: Vec<String>,
    }

    let (_server, mut db) = movie_db("cypher-deserialize").await;
    let movies = db
        .run_query_map(
            "MATCH (m:Movie {title: $title}) RETURN m",
            params! { "title" => "The Matrix" },
            |record| record.deserialize::<Movie>("m"),
        )
        .await
        .unwrap();
    assert_eq!(
        movies,
        vec![Movie {
            title: "The Matrix".into(),
            released: 1999,
            tags: vec!["sci-fi".into(), "action".into()],
        }]
    );

    let node = db
        .run_query("MATCH (m:Movie {title: 'John Wick'}) RETURN m", PropertyMap::new())
        .await
        .unwrap()[0]
        .get::<Node>("m")
        .unwrap();
    assert!(node.has_label("Movie"));
    assert_eq!(node.property("released"), Some(&Value::Int(2014)));
}

// ============================================================================
// 2. Writing
// ============================================================================

#[tokio::test]
async fn test_merge_set_and_delete() {
    let (server, mut db) = movie_db("cypher-writes").await;

    db.run_query(
        "MERGE (m:Movie {title: 'The Matrix'}) ON MATCH SET m.rating = 5",
        PropertyMap::new(),
    )
    .await
    .unwrap();
    db.run_query(
        "MERGE (m:Movie {title: 'Speed'}) ON CREATE SET m.released = 1994",
        PropertyMap::new(),
    )
    .await
    .unwrap();

    let rows = db
        .run_query(
            "MATCH (m:Movie) WHERE m.rating IS NOT NULL OR m.title = 'Speed' \
             RETURN m.title AS title, m.rating AS rating ORDER BY title",
            PropertyMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(strings(&rows, "title"), vec!["Speed", "The Matrix"]);
    assert_eq!(rows[0].value("rating"), Some(&Value::Null));
    assert_eq!(rows[1].get::<i64>("rating").unwrap(), 5);

    let err = db
        .run_query("MATCH (p:Person {name: 'Lana Wachowski'}) DELETE p", PropertyMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation(_)));

    // Driver-level summary counters.
    let driver = MemoryDriver::connect(&server.url(), AuthToken::none()).unwrap();
    let session = driver.session(SessionConfig::new()).await.unwrap();
    let stream = session
        .run("MATCH (p:Person {name: 'Lana Wachowski'}) DETACH DELETE p", PropertyMap::new())
        .await
        .unwrap();
    assert_eq!(stream.summary().nodes_deleted, 1);
    assert_eq!(stream.summary().relationships_deleted, 2);
    assert!(stream.is_empty());
}

#[tokio::test]
async fn test_failed_auto_commit_applies_nothing() {
    let (_server, mut db) = movie_db("cypher-atomic").await;

    let err = db
        .run_query(
            "MATCH (m:Movie) SET m.score = m.released / $zero",
            params! { "zero" => 0 },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExecutionError(_)));

    let rows = db
        .run_query("MATCH (m:Movie) WHERE m.score IS NOT NULL RETURN count(m) AS c", PropertyMap::new())
        .await
        .unwrap();
    assert_eq!(rows[0].get::<i64>("c").unwrap(), 0);
}

// ============================================================================
// 3. Errors
// ============================================================================

#[tokio::test]
async fn test_query_errors_pass_through() {
    let (_server, mut db) = movie_db("cypher-errors").await;

    assert!(matches!(
        db.run_query("MATCH (n RETURN n", PropertyMap::new()).await,
        Err(Error::SyntaxError { .. })
    ));
    assert!(matches!(
        db.run_query("CREATE (n:Tag {name: $name})", PropertyMap::new()).await,
        Err(Error::ParameterMissing(name)) if name == "name"
    ));
    assert!(matches!(
        db.run_query("RETURN nosuchfunction(1)", PropertyMap::new()).await,
        Err(Error::SemanticError(_))
    ));
    assert!(matches!(
        db.run_query("RETURN 'a' - 1", PropertyMap::new()).await,
        Err(Error::TypeError { .. })
    ));
}

#[tokio::test]
async fn test_maps_cannot_be_stored_as_properties() {
    let (_server, mut db) = movie_db("cypher-map-properties").await;

    assert!(matches!(
        db.run_query("MATCH (m:Movie {title: 'John Wick'}) SET m.meta = {a: 1}", PropertyMap::new()).await,
        Err(Error::TypeError { .. })
    ));
    assert!(matches!(
        db.run_query("CREATE (:Draft {meta: {a: 1}})", PropertyMap::new()).await,
        Err(Error::TypeError { .. })
    ));
    assert!(matches!(
        db.run_query("MATCH (m:Movie {title: 'John Wick'}) SET m.grid = [[1, 2], [3]]", PropertyMap::new()).await,
        Err(Error::TypeError { .. })
    ));
    assert!(matches!(
        db.run_query(
            "MATCH (p:Person)-[r:ACTED_IN]->(m:Movie {title: 'John Wick'}) SET r.friends = [p]",
            PropertyMap::new(),
        )
        .await,
        Err(Error::TypeError { .. })
    ));

    let rows = db
        .run_query("MATCH (m:Movie) WHERE m.meta IS NOT NULL RETURN count(m) AS c", PropertyMap::new())
        .await
        .unwrap();
    assert_eq!(rows[0].get::<i64>("c").unwrap(), 0);
    let rows = db.run_query("MATCH (d:Draft) RETURN count(d) AS c", PropertyMap::new()).await.unwrap();
    assert_eq!(rows[0].get::<i64>("c").unwrap(), 0);
}

#[tokio::test]
async fn test_read_access_mode() {
    let server = MemoryServer::start("cypher-read-mode").unwrap();
    let driver = Arc::new(MemoryDriver::connect(&server.url(), AuthToken::none()).unwrap());
    let mut reader = DatabaseContext::open(
        Arc::clone(&driver),
        SessionConfig::new().with_access_mode(AccessMode::Read),
    )
    .await
    .unwrap();

    assert!(reader.run_query("RETURN 1 AS one", PropertyMap::new()).await.is_ok());
    assert!(matches!(
        reader.run_query("CREATE (:Nope)", PropertyMap::new()).await,
        Err(Error::ExecutionError(_))
    ));

    let result = reader
        .begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
            db.run_query("CREATE (:Nope)", PropertyMap::new()).await
        }))
        .await;
    assert!(result.is_err());
    assert!(!reader.in_transaction());
}
