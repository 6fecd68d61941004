//! # Store Error Types
//!
//! Error types for Durable Store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Classified transient / permanent           │
//! │       │                                                                 │
//! │       ├── transient ──► ActionQueue defers, retries on next tick       │
//! │       │                                                                 │
//! │       └── permanent ──► logged, counted toward storage_degraded        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Durable Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The substrate is temporarily inaccessible.
    ///
    /// ## When This Occurs
    /// - Database is locked or busy
    /// - Connection pool exhausted or closed
    /// - File system I/O error
    /// - Fault injection in tests (`MemoryStore::set_available(false)`)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The substrate refused a write because it is full.
    ///
    /// ## When This Occurs
    /// - SQLITE_FULL (disk full)
    /// - `MemoryStore` capacity reached
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Stored data could not be read back.
    #[error("Storage corrupt: {0}")]
    Corrupt(String),

    /// Database connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    ///
    /// ## When This Occurs
    /// - Invalid SQL in migration
    /// - Migration version conflict
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Internal store error.
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns true if the operation should be deferred and retried later.
    ///
    /// This is the `StorageUnavailable` condition of the queue: callers keep
    /// the work in memory and try again on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::QuotaExceeded(_))
    }
}

// SQLite primary result codes (extended codes carry these in the low byte).
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
const SQLITE_IOERR: i64 = 10;
const SQLITE_CORRUPT: i64 = 11;
const SQLITE_FULL: i64 = 13;
const SQLITE_CANTOPEN: i64 = 14;
const SQLITE_NOTADB: i64 = 26;

/// Convert sqlx errors to StoreError.
///
/// ## Error Mapping
/// ```text
/// BUSY / LOCKED / IOERR / CANTOPEN  → StoreError::Unavailable
/// FULL                              → StoreError::QuotaExceeded
/// CORRUPT / NOTADB                  → StoreError::Corrupt
/// PoolTimedOut / PoolClosed / Io    → StoreError::Unavailable
/// Other                             → StoreError::Internal
/// ```
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                let primary = db_err
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| code & 0xff);

                match primary {
                    Some(SQLITE_BUSY | SQLITE_LOCKED | SQLITE_IOERR | SQLITE_CANTOPEN) => {
                        StoreError::Unavailable(msg)
                    }
                    Some(SQLITE_FULL) => StoreError::QuotaExceeded(msg),
                    Some(SQLITE_CORRUPT | SQLITE_NOTADB) => StoreError::Corrupt(msg),
                    _ if msg.contains("database is locked") => StoreError::Unavailable(msg),
                    _ if msg.contains("disk is full") => StoreError::QuotaExceeded(msg),
                    _ => StoreError::Internal(msg),
                }
            }

            sqlx::Error::PoolTimedOut => {
                StoreError::Unavailable("connection pool timed out".to_string())
            }

            sqlx::Error::PoolClosed => StoreError::Unavailable("pool is closed".to_string()),

            sqlx::Error::Io(io) => StoreError::Unavailable(io.to_string()),

            _ => StoreError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
