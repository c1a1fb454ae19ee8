//! Integration tests against running PostgreSQL and MySQL servers.
//!
//! Set TEST_PG_HOST (with TEST_PG_USER, TEST_PG_PASSWORD, TEST_PG_DATABASE) or
//! TEST_MYSQL_HOST (with TEST_MYSQL_USER, TEST_MYSQL_PASSWORD, TEST_MYSQL_DATABASE)
//! to run them.

use multidb_mcp_server::config::{ConfigSource, normalize};
use multidb_mcp_server::db::ConnectionManager;
use multidb_mcp_server::tools::query::{QueryInput, QueryToolHandler};
use multidb_mcp_server::tools::schema::{
    DescribeTableInput, ListSchemasInput, ListTablesInput, SchemaToolHandler,
};
use serde_json::json;
use std::sync::Arc;

/// Build a manager for one server from TEST_<PREFIX>_* variables.
fn manager_from_env(prefix: &str, section: &str) -> Option<Arc<ConnectionManager>> {
    let var = |key: &str| std::env::var(format!("TEST_{prefix}_{key}")).ok();
    let host = var("HOST")?;
    let raw = json!({
        section: {
            "live": {
                "host": host,
                "port": var("PORT").and_then(|p| p.parse::<u16>().ok()),
                "user": var("USER").unwrap_or_else(|| "test".into()),
                "password": var("PASSWORD").unwrap_or_default(),
                "database": var("DATABASE").unwrap_or_else(|| "test".into()),
            }
        }
    });
    Some(Arc::new(ConnectionManager::new(ConfigSource::fixed(
        normalize(&raw).unwrap(),
    ))))
}

async fn run(manager: &Arc<ConnectionManager>, sql: &str) -> Vec<serde_json::Map<String, serde_json::Value>> {
    QueryToolHandler::new(manager.clone())
        .query(QueryInput {
            database_name: "live".to_string(),
            query: sql.to_string(),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_postgres_round_trip() {
    let Some(manager) = manager_from_env("PG", "postgresql") else {
        eprintln!("Skipping test: TEST_PG_HOST not set");
        return;
    };

    run(&manager, "DROP TABLE IF EXISTS gateway_pg_test").await;
    run(
        &manager,
        "CREATE TABLE gateway_pg_test (id SERIAL PRIMARY KEY, code VARCHAR(12) NOT NULL, amount NUMERIC(10,2), seen TIMESTAMPTZ DEFAULT now())",
    )
    .await;
    run(&manager, "INSERT INTO gateway_pg_test (code, amount) VALUES ('a1', 12.50)").await;

    let rows = run(&manager, "SELECT code, amount FROM gateway_pg_test").await;
    assert_eq!(rows[0]["code"], "a1");
    assert_eq!(rows[0]["amount"], "12.50");

    let schema = SchemaToolHandler::new(manager.clone());
    let tables = schema
        .list_tables(ListTablesInput {
            database_name: "live".into(),
            schema: None,
        })
        .await
        .unwrap();
    assert_eq!(tables.schema.as_deref(), Some("public"));
    assert!(tables.tables.iter().any(|t| t.name == "gateway_pg_test"));

    let described = schema
        .describe_table(DescribeTableInput {
            database_name: "live".into(),
            table_name: "gateway_pg_test".into(),
            schema: None,
        })
        .await
        .unwrap();
    let code = described.columns.iter().find(|c| c.name == "code").unwrap();
    assert!(!code.nullable);
    assert_eq!(code.max_length, Some(12));

    let schemas = schema
        .list_schemas(ListSchemasInput {
            database_name: "live".into(),
        })
        .await
        .unwrap();
    assert!(schemas.schemas.contains(&"public".to_string()));
    assert!(!schemas.schemas.contains(&"pg_catalog".to_string()));

    run(&manager, "DROP TABLE gateway_pg_test").await;
    manager.cleanup().await;
}

#[tokio::test]
async fn test_postgres_structured_values_are_strings() {
    let Some(manager) = manager_from_env("PG", "postgresql") else {
        eprintln!("Skipping test: TEST_PG_HOST not set");
        return;
    };

    let rows = run(
        &manager,
        "SELECT 'a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11'::uuid AS u, interval '1 day' AS i, \
         '10.0.0.1'::inet AS ip, point(1,2) AS p, 12.34::money AS m, B'101' AS b, \
         ARRAY[1,2] AS arr, '12:30:00+02'::timetz AS tz, NULL::uuid AS nothing",
    )
    .await;
    let row = &rows[0];
    assert_eq!(row["u"], "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11");
    assert_eq!(row["i"], "1 day");
    assert_eq!(row["ip"], "10.0.0.1");
    assert_eq!(row["p"], "(1,2)");
    assert_eq!(row["m"], "12.34");
    assert_eq!(row["b"], "101");
    assert_eq!(row["arr"], json!([1, 2]));
    assert_eq!(row["tz"], "12:30:00+02:00");
    assert_eq!(row["nothing"], serde_json::Value::Null);
    manager.cleanup().await;
}

#[tokio::test]
async fn test_mysql_round_trip() {
    let Some(manager) = manager_from_env("MYSQL", "mysql") else {
        eprintln!("Skipping test: TEST_MYSQL_HOST not set");
        return;
    };

    run(&manager, "DROP TABLE IF EXISTS gateway_mysql_test").await;
    run(
        &manager,
        "CREATE TABLE gateway_mysql_test (id INT PRIMARY KEY, name VARCHAR(40) NULL) DEFAULT CHARSET=utf8mb4",
    )
    .await;
    run(&manager, "INSERT INTO gateway_mysql_test VALUES (1, '张三')").await;

    let rows = run(&manager, "SELECT id, name FROM gateway_mysql_test").await;
    assert_eq!(rows[0]["id"], 1);
    assert_eq!(rows[0]["name"], "张三");

    let schema = SchemaToolHandler::new(manager.clone());
    let tables = schema
        .list_tables(ListTablesInput {
            database_name: "live".into(),
            schema: None,
        })
        .await
        .unwrap();
    assert_eq!(tables.schema, None);
    assert!(tables.tables.iter().any(|t| t.name == "gateway_mysql_test"));

    let described = schema
        .describe_table(DescribeTableInput {
            database_name: "live".into(),
            table_name: "gateway_mysql_test".into(),
            schema: None,
        })
        .await
        .unwrap();
    assert_eq!(described.columns.len(), 2);
    assert_eq!(described.columns[1].max_length, Some(40));

    run(&manager, "DROP TABLE gateway_mysql_test").await;
    manager.cleanup().await;
}
