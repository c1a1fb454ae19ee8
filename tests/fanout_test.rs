//! Integration tests for running one query against several databases.

use multidb_mcp_server::config::{ConfigSource, normalize};
use multidb_mcp_server::db::ConnectionManager;
use multidb_mcp_server::models::FanOutOutcome;
use multidb_mcp_server::tools::query::{MultiQueryInput, QueryInput, QueryToolHandler};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn setup_two_sqlite_dbs() -> (Arc<ConnectionManager>, TempDir) {
    let dir = TempDir::new().unwrap();
    let east = dir.path().join("east.db");
    let west = dir.path().join("west.db");

    let raw = json!({
        "sqlite": {
            "east": { "database": east.to_str().unwrap() },
            "west": { "path": west.to_str().unwrap() }
        }
    });
    let manager = Arc::new(ConnectionManager::new(ConfigSource::fixed(
        normalize(&raw).unwrap(),
    )));

    let handler = QueryToolHandler::new(manager.clone());
    for (db, count) in [("east", 2), ("west", 3)] {
        handler
            .query(QueryInput {
                database_name: db.to_string(),
                query: "CREATE TABLE orders (id INTEGER PRIMARY KEY)".to_string(),
            })
            .await
            .unwrap();
        for _ in 0..count {
            handler
                .query(QueryInput {
                    database_name: db.to_string(),
                    query: "INSERT INTO orders DEFAULT VALUES".to_string(),
                })
                .await
                .unwrap();
        }
    }

    (manager, dir)
}

#[tokio::test]
async fn test_fan_out_isolates_failures() {
    let (manager, _dir) = setup_two_sqlite_dbs().await;
    let handler = QueryToolHandler::new(manager.clone());

    let results = handler
        .query_many(MultiQueryInput {
            database_names: vec!["east".into(), "ghost".into(), "west".into()],
            query: "SELECT count(*) AS n FROM orders".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results["east"].rows().unwrap()[0]["n"], 2);
    assert_eq!(results["west"].rows().unwrap()[0]["n"], 3);
    match &results["ghost"] {
        FanOutOutcome::Error { error } => {
            assert!(error.contains("Database 'ghost' not found in configuration"));
            assert!(error.contains("[east, west]"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    let value = serde_json::to_value(&results).unwrap();
    assert_eq!(value["east"], json!([{ "n": 2 }]));
    assert!(value["ghost"]["error"].is_string());

    manager.cleanup().await;
}

#[tokio::test]
async fn test_fan_out_query_error_on_one_target() {
    let (manager, _dir) = setup_two_sqlite_dbs().await;
    QueryToolHandler::new(manager.clone())
        .query(QueryInput {
            database_name: "west".to_string(),
            query: "DROP TABLE orders".to_string(),
        })
        .await
        .unwrap();

    let results = QueryToolHandler::new(manager.clone())
        .query_many(MultiQueryInput {
            database_names: vec!["east".into(), "west".into()],
            query: "SELECT id FROM orders ORDER BY id".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(results["east"].rows().unwrap().len(), 2);
    assert!(results["west"].is_error());

    manager.cleanup().await;
}

#[tokio::test]
async fn test_fan_out_empty_and_repeated_names() {
    let (manager, _dir) = setup_two_sqlite_dbs().await;
    let handler = QueryToolHandler::new(manager.clone());

    let results = handler
        .query_many(MultiQueryInput {
            database_names: vec![],
            query: "SELECT 1".to_string(),
        })
        .await
        .unwrap();
    assert!(results.is_empty());

    let results = handler
        .query_many(MultiQueryInput {
            database_names: vec!["east".into(), "east".into()],
            query: "SELECT 1 AS one".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(manager.connected_count().await, 2);

    manager.cleanup().await;
}
