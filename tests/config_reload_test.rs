//! Integration tests for reading the database document from a file.

use multidb_mcp_server::config::ConfigSource;
use multidb_mcp_server::db::ConnectionManager;
use multidb_mcp_server::error::DbError;
use multidb_mcp_server::models::LinkState;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn write_config(path: &Path, value: &serde_json::Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

#[tokio::test]
async fn test_edited_file_is_picked_up_and_stale_pool_closed() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("databases.json");
    let first_db = dir.path().join("first.db");
    let second_db = dir.path().join("second-database.db");

    write_config(
        &config_path,
        &json!({ "sqlite": { "main_db": { "database": first_db.to_str().unwrap() } } }),
    );
    let manager = ConnectionManager::new(ConfigSource::file(&config_path));
    assert_ok!(manager.ensure("main_db").await);
    assert!(manager.is_connected("main_db").await);

    // Same name, new target, different file length
    write_config(
        &config_path,
        &json!({
            "sqlite": {
                "main_db": { "database": second_db.to_str().unwrap() },
                "extra": { "database": ":memory:" }
            }
        }),
    );

    let status = manager.list_status().await.unwrap();
    assert_eq!(status.len(), 2);
    let main_db = status.iter().find(|s| s.name == "main_db").unwrap();
    assert_eq!(main_db.status, LinkState::Disconnected);
    assert_eq!(main_db.target, second_db.to_str().unwrap());

    let conn = manager.ensure("main_db").await.unwrap();
    assert_eq!(conn.config.target(), second_db.to_str().unwrap());

    manager.cleanup().await;
}

#[tokio::test]
async fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let manager = ConnectionManager::new(ConfigSource::file(dir.path().join("absent.json")));

    let err = manager.ensure("anything").await.unwrap_err();
    assert!(matches!(err, DbError::Config { .. }));
    assert!(manager.list_status().await.is_err());
}

#[tokio::test]
async fn test_flat_document_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("databases.json");
    write_config(
        &config_path,
        &json!({ "orders": { "type": "postgresql", "host": "h" } }),
    );

    let manager = ConnectionManager::new(ConfigSource::file(&config_path));
    let err = manager.list_status().await.unwrap_err();
    assert!(err.to_string().contains("Unknown database type 'orders'"));
}
