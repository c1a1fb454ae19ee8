//! One query against many logical databases.

use crate::db::pool::ConnectionManager;
use crate::error::DbResult;
use crate::models::{FanOutOutcome, FanOutResults, Row};
use futures_util::future::join_all;
use tracing::{debug, warn};

async fn query_one(manager: &ConnectionManager, name: &str, sql: &str) -> DbResult<Vec<Row>> {
    let conn = manager.ensure(name).await?;
    conn.driver.run_query(&conn.pool, sql).await
}

/// Run `sql` on every named database concurrently.
///
/// Every name gets an entry: its rows, or the error that stopped it. One
/// target failing never affects the others. Repeated names collapse to a
/// single entry.
pub async fn run_on_many(manager: &ConnectionManager, names: &[String], sql: &str) -> FanOutResults {
    let outcomes = join_all(names.iter().map(|name| async move {
        let outcome = match query_one(manager, name, sql).await {
            Ok(rows) => {
                debug!(database = %name, rows = rows.len(), "Fan-out target finished");
                FanOutOutcome::Rows(rows)
            }
            Err(e) => {
                warn!(database = %name, error = %e, "Fan-out target failed");
                FanOutOutcome::Error {
                    error: e.to_string(),
                }
            }
        };
        (name.clone(), outcome)
    }))
    .await;

    outcomes.into_iter().collect()
}
