//! End-to-end tests for the transaction-scoped `DatabaseContext`.
//!
//! Each test starts its own embedded server and checks what a fresh session
//! observes after the context call returns.

use std::sync::Arc;
use std::time::Duration;

use neo4j_berries_ogm::{
    params, AuthToken, DatabaseContext, Driver, Error, MemoryDriver, MemoryServer, Neo4jOptions,
    PropertyMap, Session, SessionConfig, TransactionConfig,
};
use pretty_assertions::assert_eq;

async fn open(server: &MemoryServer) -> DatabaseContext<MemoryDriver> {
    let driver = Arc::new(MemoryDriver::connect(&server.url(), AuthToken::none()).unwrap());
    DatabaseContext::open(driver, SessionConfig::new()).await.unwrap()
}

/// Count `label` nodes through a brand new session.
async fn fresh_count(server: &MemoryServer, label: &str) -> i64 {
    let mut db = open(server).await;
    let rows = db
        .run_query(&format!("MATCH (n:{label}) RETURN count(n) AS c"), PropertyMap::new())
        .await
        .unwrap();
    rows[0].get::<i64>("c").unwrap()
}

#[derive(Debug)]
enum AppError {
    Db(Error),
    Rejected(String),
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError::Db(e)
    }
}

// ============================================================================
// 1. Auto-managed: success commits everything
// ============================================================================

#[tokio::test]
async fn test_auto_managed_commit() {
    let server = MemoryServer::start("ctx-auto-commit").unwrap();
    let mut db = open(&server).await;

    let title = db
        .begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
            db.run_query("CREATE (:Movie {title: $t})", params! { "t" => "Alien" }).await?;
            db.run_query("CREATE (:Movie {title: $t})", params! { "t" => "Aliens" }).await?;
            assert!(db.in_transaction());
            Ok::<_, Error>("done")
        }))
        .await
        .unwrap();

    assert_eq!(title, "done");
    assert!(!db.in_transaction());
    assert!(db.transaction().is_none());
    assert_eq!(fresh_count(&server, "Movie").await, 2);
}

// ============================================================================
// 2. Auto-managed: failure rolls back and returns the error unchanged
// ============================================================================

#[tokio::test]
async fn test_auto_managed_rollback_on_error() {
    let server = MemoryServer::start("ctx-auto-rollback").unwrap();
    let mut db = open(&server).await;

    let result: Result<(), AppError> = db
        .begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
            db.run_query("CREATE (:Movie {title: 'Alien 3'})", PropertyMap::new()).await?;
            Err(AppError::Rejected("nobody liked it".into()))
        }))
        .await;

    match result {
        Err(AppError::Rejected(reason)) => assert_eq!(reason, "nobody liked it"),
        other => panic!("expected the action's error, got {other:?}"),
    }
    assert!(!db.in_transaction());
    assert_eq!(fresh_count(&server, "Movie").await, 0);
}

#[tokio::test]
async fn test_auto_managed_driver_error_rolls_back() {
    let server = MemoryServer::start("ctx-auto-driver-error").unwrap();
    let mut db = open(&server).await;

    let result: Result<(), AppError> = db
        .begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
            db.run_query("CREATE (:Movie)", PropertyMap::new()).await?;
            db.run_query("MATCH (m:Movie RETURN m", PropertyMap::new()).await?;
            Ok(())
        }))
        .await;

    assert!(matches!(result, Err(AppError::Db(Error::SyntaxError { .. }))));
    assert!(!db.in_transaction());
    assert_eq!(fresh_count(&server, "Movie").await, 0);
}

#[tokio::test]
async fn test_action_may_commit_itself() {
    let server = MemoryServer::start("ctx-action-commits").unwrap();
    let mut db = open(&server).await;

    db.begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
        db.run_query("CREATE (:Movie)", PropertyMap::new()).await?;
        db.commit_transaction().await?;
        // Back to auto-commit.
        db.run_query("CREATE (:Movie)", PropertyMap::new()).await?;
        Ok::<_, Error>(())
    }))
    .await
    .unwrap();

    assert!(!db.in_transaction());
    assert_eq!(fresh_count(&server, "Movie").await, 2);
}

// ============================================================================
// 3. Routing and isolation
// ============================================================================

#[tokio::test]
async fn test_uncommitted_writes_visible_only_inside() {
    let server = MemoryServer::start("ctx-isolation").unwrap();
    let mut db = open(&server).await;
    let mut other = open(&server).await;

    db.begin_transaction_with(TransactionConfig::new(), |tx| Box::pin(async move {
        tx.run("CREATE (:Person {name: 'Ada'})", PropertyMap::new()).await
    }))
    .await
    .unwrap();
    assert!(db.in_transaction());

    let inside = db
        .run_query("MATCH (p:Person) RETURN p.name AS name", PropertyMap::new())
        .await
        .unwrap();
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].get::<String>("name").unwrap(), "Ada");

    let outside = other
        .run_query("MATCH (p:Person) RETURN count(p) AS c", PropertyMap::new())
        .await
        .unwrap();
    assert_eq!(outside[0].get::<i64>("c").unwrap(), 0);

    db.commit_transaction().await.unwrap();
    assert!(!db.in_transaction());

    let outside = other
        .run_query("MATCH (p:Person) RETURN count(p) AS c", PropertyMap::new())
        .await
        .unwrap();
    assert_eq!(outside[0].get::<i64>("c").unwrap(), 1);
}

#[tokio::test]
async fn test_sequential_auto_commit_runs() {
    let server = MemoryServer::start("ctx-auto-commit-runs").unwrap();
    let mut db = open(&server).await;

    db.run_query("CREATE (:Step {n: 1})", PropertyMap::new()).await.unwrap();
    assert_eq!(fresh_count(&server, "Step").await, 1);

    db.run_query("CREATE (:Step {n: 2})", PropertyMap::new()).await.unwrap();
    assert_eq!(fresh_count(&server, "Step").await, 2);
}

// ============================================================================
// 4. Caller-managed transactions
// ============================================================================

#[tokio::test]
async fn test_caller_closes_through_handle() {
    let server = MemoryServer::start("ctx-caller-closes").unwrap();
    let mut db = open(&server).await;

    let id = db
        .begin_transaction_with(TransactionConfig::new(), |tx| Box::pin(async move {
            tx.run("CREATE (:Note)", PropertyMap::new()).await?;
            tx.commit().await?;
            assert!(!tx.is_open());
            assert!(matches!(tx.commit().await, Err(Error::TransactionClosed)));
            Ok::<_, Error>(tx.id())
        }))
        .await
        .unwrap();

    assert!(id.to_string().starts_with("tx-"));
    assert!(!db.in_transaction());
    assert_eq!(fresh_count(&server, "Note").await, 1);
}

#[tokio::test]
async fn test_caller_managed_rollback_through_context() {
    let server = MemoryServer::start("ctx-caller-rollback").unwrap();
    let mut db = open(&server).await;

    db.begin_transaction_with(TransactionConfig::new(), |tx| Box::pin(async move {
        tx.run("CREATE (:Note)", PropertyMap::new()).await
    }))
    .await
    .unwrap();
    db.run_query("CREATE (:Note)", PropertyMap::new()).await.unwrap();
    db.rollback_transaction().await.unwrap();

    assert!(!db.in_transaction());
    assert_eq!(fresh_count(&server, "Note").await, 0);
}

#[tokio::test]
async fn test_second_transaction_is_rejected() {
    let server = MemoryServer::start("ctx-second-tx").unwrap();
    let mut db = open(&server).await;

    db.begin_transaction_with(TransactionConfig::new(), |_tx| Box::pin(async move { Ok::<_, Error>(()) }))
        .await
        .unwrap();

    let second = db
        .begin_transaction(TransactionConfig::new(), |_db| Box::pin(async move { Ok::<_, Error>(()) }))
        .await;
    assert!(matches!(second, Err(Error::TransactionAlreadyOpen)));

    // The first transaction is untouched.
    assert!(db.in_transaction());
    db.rollback_transaction().await.unwrap();
}

// ============================================================================
// 5. Conflicts, timeouts and cancellation
// ============================================================================

#[tokio::test]
async fn test_first_committer_wins() {
    let server = MemoryServer::start("ctx-conflict").unwrap();
    let mut a = open(&server).await;
    let mut b = open(&server).await;

    for db in [&mut a, &mut b] {
        db.begin_transaction_with(TransactionConfig::new(), |tx| Box::pin(async move {
            tx.run("CREATE (:Seat)", PropertyMap::new()).await
        }))
        .await
        .unwrap();
    }

    a.commit_transaction().await.unwrap();
    assert!(matches!(b.commit_transaction().await, Err(Error::TransactionConflict(_))));
    assert!(!b.in_transaction());
    assert_eq!(fresh_count(&server, "Seat").await, 1);
}

#[tokio::test]
async fn test_auto_managed_commit_conflict_clears_slot() {
    let server = MemoryServer::start("ctx-auto-conflict").unwrap();
    let mut db = open(&server).await;
    let mut rival = open(&server).await;

    let result = db
        .begin_transaction(TransactionConfig::new(), move |db| Box::pin(async move {
            db.run_query("CREATE (:Seat {by: 'db'})", PropertyMap::new()).await?;
            // Someone else publishes while this transaction is still open.
            rival.run_query("CREATE (:Seat {by: 'rival'})", PropertyMap::new()).await?;
            Ok::<_, Error>(())
        }))
        .await;

    assert!(matches!(result, Err(Error::TransactionConflict(_))));
    assert!(!db.in_transaction());
    assert_eq!(fresh_count(&server, "Seat").await, 1);

    // The slot is free again.
    db.begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
        db.run_query("CREATE (:Seat {by: 'retry'})", PropertyMap::new()).await?;
        Ok::<_, Error>(())
    }))
    .await
    .unwrap();
    assert_eq!(fresh_count(&server, "Seat").await, 2);
}

#[tokio::test]
async fn test_timed_out_begin_transaction_is_rolled_back() {
    let server = MemoryServer::start("ctx-dropped-begin").unwrap();
    let mut db = open(&server).await;

    let elapsed = tokio::time::timeout(
        Duration::from_millis(20),
        db.begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
            db.run_query("CREATE (:X)", PropertyMap::new()).await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        })),
    )
    .await;
    assert!(elapsed.is_err());
    assert!(!db.in_transaction());

    // Auto-commit again: visible to other sessions right away.
    db.run_query("CREATE (:Y)", PropertyMap::new()).await.unwrap();
    assert_eq!(fresh_count(&server, "X").await, 0);
    assert_eq!(fresh_count(&server, "Y").await, 1);

    db.begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
        db.run_query("CREATE (:Z)", PropertyMap::new()).await?;
        Ok::<_, Error>(())
    }))
    .await
    .unwrap();
    assert_eq!(fresh_count(&server, "Z").await, 1);
}

#[tokio::test]
async fn test_losing_select_branch_releases_transaction() {
    let server = MemoryServer::start("ctx-select-begin").unwrap();
    let mut db = open(&server).await;

    tokio::select! {
        _ = db.begin_transaction(TransactionConfig::new(), |db| Box::pin(async move {
            db.run_query("CREATE (:Lost)", PropertyMap::new()).await?;
            std::future::pending::<()>().await;
            Ok::<_, Error>(())
        })) => panic!("the transaction never finishes"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }

    db.begin_transaction_with(TransactionConfig::new(), |tx| Box::pin(async move {
        tx.run("CREATE (:Kept)", PropertyMap::new()).await
    }))
    .await
    .unwrap();
    db.commit_transaction().await.unwrap();

    assert_eq!(fresh_count(&server, "Lost").await, 0);
    assert_eq!(fresh_count(&server, "Kept").await, 1);
}

#[tokio::test]
async fn test_transaction_timeout() {
    let server = MemoryServer::start("ctx-timeout").unwrap();
    let mut db = open(&server).await;
    let config = TransactionConfig::new().with_timeout(Duration::from_millis(5));

    let result = db
        .begin_transaction(config, |db| Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            db.run_query("CREATE (:Late)", PropertyMap::new()).await?;
            Ok::<_, Error>(())
        }))
        .await;

    assert!(matches!(result, Err(Error::TransactionTimedOut(_))));
    assert!(!db.in_transaction());
    assert_eq!(fresh_count(&server, "Late").await, 0);
}

#[tokio::test]
async fn test_run_query_until_cancelled() {
    let server = MemoryServer::start("ctx-cancel").unwrap();
    let mut db = open(&server).await;

    let cancelled = db
        .run_query_until("CREATE (:Never)", PropertyMap::new(), std::future::ready(()))
        .await;
    assert!(matches!(cancelled, Err(Error::Cancelled)));
    assert_eq!(fresh_count(&server, "Never").await, 0);

    let rows = db
        .run_query_until("RETURN 1 AS one", PropertyMap::new(), std::future::pending())
        .await
        .unwrap();
    assert_eq!(rows[0].get::<i64>("one").unwrap(), 1);
}

// ============================================================================
// 6. Options, databases and close
// ============================================================================

#[tokio::test]
async fn test_from_options_named_database() {
    let server = MemoryServer::builder()
        .credentials("neo4j", "secret")
        .database("films")
        .start("ctx-options")
        .unwrap();

    let options = Neo4jOptions::new(server.url())
        .with_credentials("neo4j", "secret")
        .with_database("films");
    let mut db = DatabaseContext::<MemoryDriver>::from_options(&options).await.unwrap();
    assert_eq!(db.session().database(), "films");
    db.run_query("CREATE (:Film)", PropertyMap::new()).await.unwrap();
    db.close().await.unwrap();

    let wrong = options.clone().with_credentials("neo4j", "nope");
    assert!(matches!(
        DatabaseContext::<MemoryDriver>::from_options(&wrong).await,
        Err(Error::AuthenticationFailed(_))
    ));
    let missing = options.with_database("music");
    assert!(matches!(
        DatabaseContext::<MemoryDriver>::from_options(&missing).await,
        Err(Error::DatabaseNotFound(_))
    ));
}

#[tokio::test]
async fn test_closed_driver_rejects_new_contexts() {
    let server = MemoryServer::start("ctx-closed").unwrap();
    let driver = Arc::new(MemoryDriver::connect(&server.url(), AuthToken::none()).unwrap());
    let db = DatabaseContext::open(Arc::clone(&driver), SessionConfig::new()).await.unwrap();
    db.close().await.unwrap();

    driver.close().await.unwrap();
    assert!(matches!(
        DatabaseContext::open(driver, SessionConfig::new()).await,
        Err(Error::ServiceUnavailable(_))
    ));
}
