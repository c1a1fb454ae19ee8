//! SQL Server backend.
//!
//! The native client is blocking, so each pool owns a fixed set of worker
//! threads, one per pre-opened connection. Operations are handed to the next
//! worker in rotation over a channel and the caller awaits the reply; the
//! async runtime never blocks on the client.
//!
//! The client itself sits behind [`NativeClient`] / [`NativeConnection`]. The
//! ODBC implementation is compiled with the `mssql` feature; without it the
//! driver still resolves but every connect reports how to enable it.

use crate::config::DEFAULT_POOL_SIZE;
use crate::db::driver::{BackendDriver, required};
use crate::db::round_robin::RoundRobin;
use crate::error::{DbError, DbResult};
use crate::models::{BackendType, ColumnDescriptor, ConnectionConfig, Row, TableEntry};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Installed drivers in order of preference.
pub const PREFERRED_DRIVERS: [&str; 4] = [
    "ODBC Driver 18 for SQL Server",
    "ODBC Driver 17 for SQL Server",
    "ODBC Driver 13 for SQL Server",
    "SQL Server Native Client 11.0",
];

const DEFAULT_SCHEMA: &str = "dbo";

/// One open, blocking connection. Lives on a single worker thread.
pub trait NativeConnection {
    /// Execute `sql` and return every row of the first result set.
    fn query(&mut self, sql: &str) -> DbResult<Vec<Row>>;
}

/// Blocking client library used to open SQL Server connections.
pub trait NativeClient: Send + Sync {
    /// Names of the drivers installed on this host.
    fn installed_drivers(&self) -> DbResult<Vec<String>>;

    /// Open one connection. Called on the worker thread that will own it.
    fn open(&self, connection_string: &str) -> DbResult<Box<dyn NativeConnection>>;
}

/// Client used when the crate is built without ODBC support.
#[derive(Debug, Default)]
pub struct UnavailableClient;

impl NativeClient for UnavailableClient {
    fn installed_drivers(&self) -> DbResult<Vec<String>> {
        Err(DbError::connection(
            "SQL Server support is not compiled into this build",
            "Rebuild with `--features mssql` and install unixODBC plus msodbcsql",
        ))
    }

    fn open(&self, _connection_string: &str) -> DbResult<Box<dyn NativeConnection>> {
        Err(self
            .installed_drivers()
            .err()
            .unwrap_or_else(|| DbError::internal("SQL Server client unavailable")))
    }
}

/// The client this build ships with.
pub fn default_client() -> Arc<dyn NativeClient> {
    #[cfg(feature = "mssql")]
    {
        Arc::new(crate::db::odbc::OdbcClient)
    }
    #[cfg(not(feature = "mssql"))]
    {
        Arc::new(UnavailableClient)
    }
}

/// Pick the newest certified driver, else whatever is installed.
pub fn choose_driver(installed: &[String]) -> DbResult<String> {
    PREFERRED_DRIVERS
        .iter()
        .find(|preferred| installed.iter().any(|d| d == *preferred))
        .map(|d| d.to_string())
        .or_else(|| installed.first().cloned())
        .ok_or_else(|| {
            DbError::connection(
                "No ODBC drivers detected. Install Microsoft ODBC Driver for SQL Server (msodbcsql) in the container.",
                "Install msodbcsql18 and unixODBC, then restart the server",
            )
        })
}

/// Brace a connection-string value when it contains `;`, `{` or `}`.
fn odbc_value(value: &str) -> String {
    if value.contains([';', '{', '}']) {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

/// Build the ODBC connection string for `config` using `driver`.
pub fn connection_string(config: &ConnectionConfig, driver: &str) -> DbResult<String> {
    let params = &config.params;
    let host = required(config, "host", params.host.as_deref())?;
    let user = required(config, "user", params.user.as_deref())?;
    let password = required(config, "password", params.password.as_deref())?;
    let database = required(config, "database", params.database.as_deref())?;

    let mut parts = vec![
        format!("DRIVER={{{}}}", driver),
        format!("SERVER={},{}", odbc_value(host), config.port().unwrap_or(1433)),
        format!("DATABASE={}", odbc_value(database)),
        format!("UID={}", odbc_value(user)),
        format!("PWD={}", odbc_value(password)),
    ];
    if let Some(encrypt) = params.encrypt {
        parts.push(format!("Encrypt={}", yes_no(encrypt)));
    }
    if let Some(trust) = params.trust_server_certificate {
        parts.push(format!("TrustServerCertificate={}", yes_no(trust)));
    }
    Ok(parts.join(";"))
}

/// Quote a value as a T-SQL string literal.
fn sql_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT TABLE_NAME AS name, TABLE_TYPE AS kind
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = {schema}
        ORDER BY TABLE_NAME
        "#;

    pub const DESCRIBE_TABLE: &str = r#"
        SELECT
            COLUMN_NAME AS name,
            DATA_TYPE AS data_type,
            IS_NULLABLE AS is_nullable,
            COLUMN_DEFAULT AS column_default,
            CHARACTER_MAXIMUM_LENGTH AS max_length
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = {schema} AND TABLE_NAME = {table}
        ORDER BY ORDINAL_POSITION
        "#;

    pub const LIST_SCHEMAS: &str = r#"
        SELECT SCHEMA_NAME AS name
        FROM INFORMATION_SCHEMA.SCHEMATA
        ORDER BY SCHEMA_NAME
        "#;
}

// =============================================================================
// Worker threads
// =============================================================================

struct Job {
    sql: String,
    reply: oneshot::Sender<DbResult<Vec<Row>>>,
}

/// A thread owning one native connection.
struct Worker {
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn the thread and wait until its connection is open.
    async fn start(
        client: Arc<dyn NativeClient>,
        connection_string: String,
        index: usize,
    ) -> DbResult<Worker> {
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel::<DbResult<()>>();

        let handle = std::thread::Builder::new()
            .name(format!("sqlserver-{}", index))
            .spawn(move || {
                let mut conn = match client.open(&connection_string) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Some(job) = jobs_rx.blocking_recv() {
                    let _ = job.reply.send(conn.query(&job.sql));
                }
                // Channel closed: dropping the connection disconnects it
            })
            .map_err(|e| DbError::internal(format!("Cannot spawn SQL Server worker: {}", e)))?;

        let opened = ready_rx
            .await
            .unwrap_or_else(|_| Err(DbError::internal("SQL Server worker exited during connect")));
        let worker = Worker {
            jobs: Mutex::new(Some(jobs_tx)),
            handle: Mutex::new(Some(handle)),
        };
        match opened {
            Ok(()) => Ok(worker),
            Err(e) => {
                worker.shutdown().await;
                Err(e)
            }
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Job>> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop accepting jobs and wait for the thread to finish. Idempotent.
    async fn shutdown(&self) {
        drop(self.jobs.lock().unwrap_or_else(PoisonError::into_inner).take());
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("SQL Server worker terminated abnormally");
            }
        }
    }
}

/// Open SQL Server connections for one logical database.
pub struct SqlServerPool {
    target: String,
    workers: RoundRobin<Worker>,
}

impl std::fmt::Debug for SqlServerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerPool")
            .field("target", &self.target)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl SqlServerPool {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run `sql` on the next worker in rotation.
    async fn query(&self, sql: impl Into<String>) -> DbResult<Vec<Row>> {
        let closed = || {
            DbError::connection(
                format!("SQL Server connections to {} are closed", self.target),
                "The connection was shut down; retry to reconnect",
            )
        };
        let sender = self.workers.next().and_then(Worker::sender).ok_or_else(closed)?;

        let (reply, response) = oneshot::channel();
        sender
            .send(Job {
                sql: sql.into(),
                reply,
            })
            .map_err(|_| closed())?;
        response
            .await
            .unwrap_or_else(|_| Err(DbError::internal("SQL Server worker stopped mid-query")))
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn integer(row: &Row, column: &str) -> Option<i64> {
    match row.get(column)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Driver
// =============================================================================

#[derive(Clone)]
pub struct SqlServerDriver {
    client: Arc<dyn NativeClient>,
}

impl std::fmt::Debug for SqlServerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerDriver").finish_non_exhaustive()
    }
}

impl SqlServerDriver {
    pub fn new(client: Arc<dyn NativeClient>) -> Self {
        Self { client }
    }
}

impl BackendDriver for SqlServerDriver {
    type Pool = SqlServerPool;

    fn backend(&self) -> BackendType {
        BackendType::SqlServer
    }

    async fn connect(&self, config: &ConnectionConfig) -> DbResult<SqlServerPool> {
        // Driver enumeration is a blocking driver-manager call
        let client = Arc::clone(&self.client);
        let installed = tokio::task::spawn_blocking(move || client.installed_drivers())
            .await
            .map_err(|e| DbError::internal(format!("SQL Server driver lookup failed: {e}")))??;
        let driver = choose_driver(&installed)?;
        let connection_string = connection_string(config, &driver)?;
        let target = config.describe_target();
        debug!(driver = %driver, endpoint = %target, "Opening SQL Server connections");

        let mut workers = Vec::with_capacity(DEFAULT_POOL_SIZE as usize);
        for index in 0..DEFAULT_POOL_SIZE as usize {
            let started =
                Worker::start(Arc::clone(&self.client), connection_string.clone(), index).await;
            match started {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for worker in &workers {
                        worker.shutdown().await;
                    }
                    let message = format!("Cannot connect to SQL Server at {}: {}", target, e);
                    return Err(DbError::connection(
                        message,
                        e.suggestion()
                            .unwrap_or("Verify host, port, user, password and database"),
                    ));
                }
            }
        }

        info!(endpoint = %target, driver = %driver, "SQL Server connections ready");
        Ok(SqlServerPool {
            target,
            workers: RoundRobin::new(workers),
        })
    }

    async fn run_query(&self, pool: &SqlServerPool, sql: &str) -> DbResult<Vec<Row>> {
        pool.query(sql).await
    }

    async fn list_tables(
        &self,
        pool: &SqlServerPool,
        schema: Option<&str>,
    ) -> DbResult<Vec<TableEntry>> {
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        let sql = queries::LIST_TABLES.replace("{schema}", &sql_literal(schema));
        let rows = pool.query(sql).await?;
        Ok(rows
            .iter()
            .map(|row| {
                TableEntry::new(
                    text(row, "name").unwrap_or_default(),
                    text(row, "kind").unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn describe_table(
        &self,
        pool: &SqlServerPool,
        table: &str,
        schema: Option<&str>,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        let sql = queries::DESCRIBE_TABLE
            .replace("{schema}", &sql_literal(schema))
            .replace("{table}", &sql_literal(table));
        let rows = pool.query(sql).await?;
        Ok(rows
            .iter()
            .map(|row| {
                ColumnDescriptor::new(
                    text(row, "name").unwrap_or_default(),
                    text(row, "data_type").unwrap_or_default(),
                    text(row, "is_nullable").as_deref() == Some("YES"),
                )
                .with_default(text(row, "column_default"))
                .with_max_length(integer(row, "max_length"))
            })
            .collect())
    }

    async fn list_schemas(&self, pool: &SqlServerPool) -> DbResult<Vec<String>> {
        let rows = pool.query(queries::LIST_SCHEMAS).await?;
        Ok(rows.iter().filter_map(|row| text(row, "name")).collect())
    }

    async fn close(&self, pool: &SqlServerPool) {
        for worker in pool.workers.iter() {
            worker.shutdown().await;
        }
        debug!(endpoint = %pool.target, "SQL Server connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionParams;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every statement and answers with canned catalog rows.
    #[derive(Default)]
    struct FakeClient {
        drivers: Vec<String>,
        statements: Arc<Mutex<Vec<String>>>,
        opened: Arc<AtomicUsize>,
        fail_after: Option<usize>,
        lookup_thread: Arc<Mutex<Option<std::thread::ThreadId>>>,
    }

    struct FakeConnection {
        id: usize,
        statements: Arc<Mutex<Vec<String>>>,
    }

    impl NativeConnection for FakeConnection {
        fn query(&mut self, sql: &str) -> DbResult<Vec<Row>> {
            self.statements.lock().unwrap().push(sql.to_string());
            if sql.contains("INFORMATION_SCHEMA.COLUMNS") {
                let row = json!({
                    "name": "id", "data_type": "int", "is_nullable": "NO",
                    "column_default": null, "max_length": null
                });
                return Ok(vec![row.as_object().unwrap().clone()]);
            }
            if sql.contains("INFORMATION_SCHEMA.TABLES") {
                let row = json!({ "name": "orders", "kind": "BASE TABLE" });
                return Ok(vec![row.as_object().unwrap().clone()]);
            }
            let row = json!({ "connection": self.id });
            Ok(vec![row.as_object().unwrap().clone()])
        }
    }

    impl NativeClient for FakeClient {
        fn installed_drivers(&self) -> DbResult<Vec<String>> {
            *self.lookup_thread.lock().unwrap() = Some(std::thread::current().id());
            Ok(self.drivers.clone())
        }

        fn open(&self, _connection_string: &str) -> DbResult<Box<dyn NativeConnection>> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| id >= limit) {
                return Err(DbError::connection("Login failed for user 'sa'", "Check credentials"));
            }
            Ok(Box::new(FakeConnection {
                id,
                statements: Arc::clone(&self.statements),
            }))
        }
    }

    fn config() -> ConnectionConfig {
        let params = ConnectionParams {
            host: Some("mssql".into()),
            user: Some("sa".into()),
            password: Some("p;w".into()),
            database: Some("erp".into()),
            encrypt: Some(true),
            trust_server_certificate: Some(false),
            ..Default::default()
        };
        ConnectionConfig::new("erp", BackendType::SqlServer, params)
    }

    #[test]
    fn test_choose_driver_prefers_newest() {
        let installed = vec![
            "FreeTDS".to_string(),
            "ODBC Driver 17 for SQL Server".to_string(),
            "ODBC Driver 18 for SQL Server".to_string(),
        ];
        assert_eq!(choose_driver(&installed).unwrap(), "ODBC Driver 18 for SQL Server");
        assert_eq!(choose_driver(&["FreeTDS".to_string()]).unwrap(), "FreeTDS");
    }

    #[test]
    fn test_choose_driver_without_drivers_is_actionable() {
        let err = choose_driver(&[]).unwrap_err();
        assert!(err.to_string().contains("No ODBC drivers detected"));
        assert!(err.to_string().contains("msodbcsql"));
    }

    #[test]
    fn test_connection_string_options() {
        let s = connection_string(&config(), "ODBC Driver 18 for SQL Server").unwrap();
        assert_eq!(
            s,
            "DRIVER={ODBC Driver 18 for SQL Server};SERVER=mssql,1433;DATABASE=erp;UID=sa;PWD={p;w};Encrypt=Yes;TrustServerCertificate=No"
        );
    }

    #[test]
    fn test_sql_literal_doubles_quotes() {
        assert_eq!(sql_literal("o'brien"), "N'o''brien'");
    }

    #[tokio::test]
    async fn test_round_robin_over_workers_and_default_schema() {
        let client = Arc::new(FakeClient {
            drivers: vec!["ODBC Driver 18 for SQL Server".to_string()],
            ..Default::default()
        });
        let statements = Arc::clone(&client.statements);
        let driver = SqlServerDriver::new(client);
        let pool = driver.connect(&config()).await.unwrap();
        assert_eq!(pool.len(), 5);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let rows = driver.run_query(&pool, "SELECT 1").await.unwrap();
            seen.push(rows[0]["connection"].as_u64().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        let tables = driver.list_tables(&pool, None).await.unwrap();
        assert_eq!(tables, vec![TableEntry::new("orders", "BASE TABLE")]);
        assert!(statements.lock().unwrap().last().unwrap().contains("TABLE_SCHEMA = N'dbo'"));

        let columns = driver.describe_table(&pool, "orders", None).await.unwrap();
        assert_eq!(columns.len(), 1);
        assert!(!columns[0].nullable);

        driver.close(&pool).await;
        driver.close(&pool).await;
        let err = driver.run_query(&pool, "SELECT 1").await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_partial_open_failure_reports_connection_error() {
        let client = Arc::new(FakeClient {
            drivers: vec!["ODBC Driver 17 for SQL Server".to_string()],
            fail_after: Some(2),
            ..Default::default()
        });
        let driver = SqlServerDriver::new(client);
        let err = driver.connect(&config()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("mssql:1433/erp"));
        assert!(msg.contains("Login failed"));
    }

    #[tokio::test]
    async fn test_driver_lookup_runs_off_the_runtime_thread() {
        let client = Arc::new(FakeClient::default());
        let lookup_thread = Arc::clone(&client.lookup_thread);
        let driver = SqlServerDriver::new(client);
        assert!(driver.connect(&config()).await.is_err());

        let recorded = lookup_thread.lock().unwrap().expect("driver lookup ran");
        assert_ne!(recorded, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_no_drivers_fails_fast() {
        let driver = SqlServerDriver::new(Arc::new(FakeClient::default()));
        let err = driver.connect(&config()).await.unwrap_err();
        assert!(err.to_string().contains("No ODBC drivers detected"));
    }
}
