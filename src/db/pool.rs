//! Connection lifecycle for logical databases.
//!
//! # Design Decisions
//!
//! - **`OnceCell` per logical name**: single-flight connect, so concurrent
//!   first requests for the same database open exactly one pool
//! - **No negative caching**: a failed connect leaves the cell empty and the
//!   next request tries again
//! - **Config-driven eviction**: when the configuration document changes,
//!   live pools whose entry changed or disappeared are closed
//!
//! # Concurrency Safety
//!
//! - All locks are released before async operations (await points)
//! - Pools are drained under the lock and closed outside it

use crate::config::{ConfigSource, ConnectionMap};
use crate::db::driver::{DbPool, Driver};
use crate::db::registry::Registry;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, ConnectionStatus, LinkState};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// An open pool together with the driver and configuration that produced it.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    pub config: ConnectionConfig,
    pub driver: Driver,
    pub pool: DbPool,
}

type Slot = Arc<OnceCell<LiveConnection>>;

/// Owns every live pool, keyed by logical database name.
pub struct ConnectionManager {
    source: ConfigSource,
    registry: Registry,
    live: RwLock<HashMap<String, Slot>>,
    /// Configuration the live table was last reconciled against.
    reconciled: Mutex<Option<Arc<ConnectionMap>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("source", &self.source)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(source: ConfigSource) -> Self {
        Self::with_registry(source, Registry::default())
    }

    pub fn with_registry(source: ConfigSource, registry: Registry) -> Self {
        Self {
            source,
            registry,
            live: RwLock::new(HashMap::new()),
            reconciled: Mutex::new(None),
        }
    }

    /// Current configuration, with stale pools evicted after a change.
    pub async fn config(&self) -> DbResult<Arc<ConnectionMap>> {
        let connections = self.source.load().await?;

        let changed = {
            let mut seen = self.reconciled.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = seen
                .as_ref()
                .is_none_or(|previous| !Arc::ptr_eq(previous, &connections));
            if changed {
                *seen = Some(Arc::clone(&connections));
            }
            changed
        };
        if changed {
            self.evict_stale(&connections).await;
        }
        Ok(connections)
    }

    /// Close live pools whose configuration entry changed or disappeared.
    async fn evict_stale(&self, connections: &ConnectionMap) {
        let stale: Vec<(String, Slot)> = {
            let mut live = self.live.write().await;
            let names: Vec<String> = live
                .iter()
                .filter(|(name, slot)| {
                    slot.get()
                        .is_some_and(|conn| connections.get(*name) != Some(&conn.config))
                })
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| live.remove(&name).map(|slot| (name, slot)))
                .collect()
        }; // Lock released here

        for (name, slot) in stale {
            if let Some(conn) = slot.get() {
                info!(database = %name, "Configuration changed, closing pool");
                conn.driver.close(&conn.pool).await;
            }
        }
    }

    /// Get or create the slot for `name`.
    async fn slot(&self, name: &str) -> Slot {
        {
            let live = self.live.read().await;
            if let Some(slot) = live.get(name) {
                return Arc::clone(slot);
            }
        }
        let mut live = self.live.write().await;
        // Double-check after acquiring write lock
        Arc::clone(live.entry(name.to_string()).or_default())
    }

    /// Return the live connection for `name`, connecting on first use.
    pub async fn ensure(&self, name: &str) -> DbResult<LiveConnection> {
        let connections = self.config().await?;
        let config = connections
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::not_found(name, connections.keys().cloned()))?;

        let slot = self.slot(name).await;
        let conn = slot
            .get_or_try_init(|| async {
                let driver = self.registry.driver(config.backend_type);
                info!(
                    database = %name,
                    db_type = %config.backend_type,
                    "Connecting to database"
                );
                let pool = driver
                    .connect(&config)
                    .await
                    .map_err(|e| connect_failure(name, e))?;
                info!(database = %name, "Connected successfully");
                Ok::<_, DbError>(LiveConnection {
                    config: config.clone(),
                    driver,
                    pool,
                })
            })
            .await?;
        Ok(conn.clone())
    }

    /// Connect every configured database that is not yet live.
    ///
    /// Failures are logged and skipped. Returns the number of live connections.
    pub async fn preconnect_all(&self) -> DbResult<usize> {
        let connections = self.config().await?;
        let attempts = connections.keys().map(|name| async move {
            if let Err(e) = self.ensure(name).await {
                warn!(database = %name, error = %e, "Failed to connect to database");
            }
        });
        join_all(attempts).await;

        let connected = self.connected_count().await;
        info!(
            connected,
            configured = connections.len(),
            "Preconnect finished"
        );
        Ok(connected)
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        let live = self.live.read().await;
        live.get(name).is_some_and(|slot| slot.initialized())
    }

    pub async fn connected_count(&self) -> usize {
        let live = self.live.read().await;
        live.values().filter(|slot| slot.initialized()).count()
    }

    /// Every configured database with its connection status, by name.
    pub async fn list_status(&self) -> DbResult<Vec<ConnectionStatus>> {
        let connections = self.config().await?;
        let live = self.live.read().await;
        Ok(connections
            .values()
            .map(|config| ConnectionStatus {
                name: config.name.clone(),
                backend_type: config.backend_type,
                status: if live.get(&config.name).is_some_and(|slot| slot.initialized()) {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                },
                target: config.target().to_string(),
            })
            .collect())
    }

    /// Close every live pool and forget it.
    pub async fn cleanup(&self) {
        // Drain pools under lock, close outside lock
        let drained: Vec<(String, Slot)> = {
            let mut live = self.live.write().await;
            live.drain().collect()
        };

        for (name, slot) in drained {
            if let Some(conn) = slot.get() {
                info!(database = %name, "Closing connection");
                conn.driver.close(&conn.pool).await;
            }
        }
        debug!("All connections closed");
    }
}

/// Wrap a driver connect failure with the logical name.
fn connect_failure(name: &str, err: DbError) -> DbError {
    let suggestion = err
        .suggestion()
        .unwrap_or("Please check your connection settings.")
        .to_string();
    DbError::connection(
        format!(
            "Failed to connect to database '{}': {}. Please check your connection settings.",
            name, err
        ),
        suggestion,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendType, ConnectionParams};
    use serde_json::json;

    fn sqlite_source(names: &[&str]) -> ConfigSource {
        let section: serde_json::Map<String, serde_json::Value> = names
            .iter()
            .map(|n| (n.to_string(), json!({ "database": ":memory:" })))
            .collect();
        let connections = crate::config::normalize(&json!({ "sqlite": section })).unwrap();
        ConfigSource::fixed(connections)
    }

    #[tokio::test]
    async fn test_unknown_name_lists_available() {
        let manager = ConnectionManager::new(sqlite_source(&["alpha", "beta"]));
        let err = manager.ensure("gamma").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Database 'gamma' not found in configuration. Available databases: [alpha, beta]"
        );
    }

    #[tokio::test]
    async fn test_concurrent_ensure_connects_once() {
        let manager = ConnectionManager::new(sqlite_source(&["alpha"]));
        let (a, b) = tokio::join!(manager.ensure("alpha"), manager.ensure("alpha"));
        let (a, b) = (a.unwrap(), b.unwrap());
        match (&a.pool, &b.pool) {
            (DbPool::SQLite(x), DbPool::SQLite(y)) => assert!(Arc::ptr_eq(x, y)),
            other => panic!("unexpected pools: {other:?}"),
        }
        assert_eq!(manager.connected_count().await, 1);
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let params = ConnectionParams {
            host: Some("mssql".into()),
            ..Default::default()
        };
        let mut connections = ConnectionMap::new();
        connections.insert(
            "erp".into(),
            ConnectionConfig::new("erp", BackendType::SqlServer, params),
        );
        let manager = ConnectionManager::new(ConfigSource::fixed(connections));

        for _ in 0..2 {
            let err = manager.ensure("erp").await.unwrap_err();
            assert!(matches!(err, DbError::Connection { .. }));
            assert!(err.to_string().starts_with("Failed to connect to database 'erp'"));
        }
        assert!(!manager.is_connected("erp").await);
    }

    #[tokio::test]
    async fn test_status_and_cleanup() {
        let manager = ConnectionManager::new(sqlite_source(&["alpha", "beta"]));
        manager.ensure("beta").await.unwrap();

        let status = manager.list_status().await.unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].status, LinkState::Disconnected);
        assert_eq!(status[1].status, LinkState::Connected);
        assert_eq!(status[1].target, ":memory:");

        manager.cleanup().await;
        assert_eq!(manager.connected_count().await, 0);
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn test_preconnect_counts_live_connections() {
        let manager = ConnectionManager::new(sqlite_source(&["alpha", "beta", "gamma"]));
        assert_eq!(manager.preconnect_all().await.unwrap(), 3);
        manager.cleanup().await;
    }
}
