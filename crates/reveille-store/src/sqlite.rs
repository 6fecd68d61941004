//! # SQLite Durable Store
//!
//! Connection pool creation and the `kv_entries` adapter.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SQLite Durable Store                               │
//! │                                                                         │
//! │  StoreConfig::new(path) ← Configure pool settings                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqliteStore::open(config).await ← Create pool + run migrations        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐               │  (max_connections)        │
//! │  │  │Conn1│ │Conn2│ │Conn3│ ...           │                           │
//! │  │  └─────┘ └─────┘ └─────┘               │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  kv_entries (key TEXT PRIMARY KEY) ── prefix scan = index range scan   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Prefix Scans
//! `list_by_prefix("queue/battle/")` becomes
//! `WHERE key >= 'queue/battle/' AND key < 'queue/battle0'`, which SQLite
//! answers straight from the primary-key index in key order. `LIKE` would
//! need escaping and cannot use the index under the default collation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::{prefix_upper_bound, DurableStore, StoreEntry};
use crate::error::{StoreError, StoreResult};
use crate::migrations;

// =============================================================================
// Configuration
// =============================================================================

/// SQLite store configuration.
///
/// ## Example
/// ```rust
/// use reveille_store::StoreConfig;
///
/// let config = StoreConfig::new("/tmp/reveille.db").max_connections(2);
/// assert_eq!(config.max_connections, 2);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 4
    pub max_connections: u32,

    /// Connection acquire timeout.
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Whether to run migrations on open.
    /// Default: true
    pub run_migrations: bool,
}

impl StoreConfig {
    /// Creates a configuration for the database file at `path`.
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            database_path: path.into(),
            max_connections: 4,
            connect_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Creates an in-memory database configuration (for testing).
    pub fn in_memory() -> Self {
        StoreConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            connect_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the connection acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on open.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == ":memory:"
    }
}

// =============================================================================
// SqliteStore
// =============================================================================

/// Durable Store backed by a single SQLite table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (and if needed creates) the database, then runs migrations.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Enables WAL journal and NORMAL synchronous mode
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Opening durable store"
        );

        let (connect_options, idle_timeout) = if config.is_in_memory() {
            // The database lives only as long as its connection, so never reap it.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
            (options, None)
        } else {
            let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
            let options = SqliteConnectOptions::from_str(&connect_url)
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true);
            (options, Some(Duration::from_secs(600)))
        };

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(idle_timeout)
            .max_lifetime(idle_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Store pool created");

        let store = SqliteStore { pool };

        if config.run_migrations {
            migrations::run_migrations(&store.pool).await?;
        }

        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the connection pool. Later operations fail as unavailable.
    pub async fn close(&self) {
        info!("Closing durable store");
        self.pool.close().await;
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<StoreEntry>> {
        let rows: Vec<(String, String)> = match prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query_as(
                    "SELECT key, value FROM kv_entries WHERE key >= ?1 AND key < ?2 ORDER BY key",
                )
                .bind(prefix)
                .bind(upper)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT key, value FROM kv_entries ORDER BY key")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(key, value)| StoreEntry { key, value })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let result = match prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query("DELETE FROM kv_entries WHERE key >= ?1 AND key < ?2")
                    .bind(prefix)
                    .bind(upper)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM kv_entries").execute(&self.pool).await?,
        };

        debug!(prefix, removed = result.rows_affected(), "Deleted key prefix");
        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::open(StoreConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = store().await;
        assert!(store.health_check().await);

        let (total, applied) = migrations::migration_status(store.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_put_get_overwrite_delete() {
        let store = store().await;

        store.put("cursor/battle", "{\"v\":1}").await.unwrap();
        store.put("cursor/battle", "{\"v\":2}").await.unwrap();
        assert_eq!(
            store.get("cursor/battle").await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );

        store.delete("cursor/battle").await.unwrap();
        store.delete("cursor/battle").await.unwrap();
        assert_eq!(store.get("cursor/battle").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_by_prefix_is_sorted_and_scoped() {
        let store = store().await;

        store.put("queue/battle/00000000000000000002/b", "2").await.unwrap();
        store.put("queue/battle/00000000000000000001/a", "1").await.unwrap();
        store.put("queue/battleRoyale/00000000000000000001/c", "x").await.unwrap();
        store.put("cursor/battle", "c").await.unwrap();

        let entries = store.list_by_prefix("queue/battle/").await.unwrap();
        let values: Vec<_> = entries.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["1", "2"]);

        assert_eq!(store.list_by_prefix("queue/").await.unwrap().len(), 3);
        assert_eq!(store.list_by_prefix("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = store().await;

        store.put("queue/battle/1/a", "1").await.unwrap();
        store.put("queue/sleepSession/1/b", "2").await.unwrap();
        store.put("cursor/battle", "c").await.unwrap();

        assert_eq!(store.delete_prefix("queue/").await.unwrap(), 2);
        assert_eq!(store.list_by_prefix("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let store = store().await;
        store.close().await;

        let err = store.put("k", "v").await.unwrap_err();
        assert!(err.is_transient());
        assert!(!store.health_check().await);
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("/tmp/test.db")
            .max_connections(8)
            .run_migrations(false);

        assert_eq!(config.max_connections, 8);
        assert!(!config.run_migrations);
        assert!(!config.is_in_memory());
        assert!(StoreConfig::in_memory().is_in_memory());
    }
}
