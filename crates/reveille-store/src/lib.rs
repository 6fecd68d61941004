//! # reveille-store: Durable Store for the Offline Action Queue
//!
//! Local key-value persistence that survives process restarts. The action
//! queue writes every record through the [`DurableStore`] trait and never
//! sees SQL.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Reveille Data Flow                               │
//! │                                                                         │
//! │  SyncEngine::enqueue_action                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ActionQueue (reveille-sync) ── keys from reveille-core::keys          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 reveille-store (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ DurableStore  │    │  SqliteStore  │    │  Migrations  │  │   │
//! │  │   │  (backend.rs) │◄───│  MemoryStore  │    │  (embedded)  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (kv_entries) or process memory                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`backend`] - The `DurableStore` trait
//! - [`sqlite`] - Pooled SQLite adapter and its configuration
//! - [`memory`] - In-memory adapter with fault injection
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reveille_store::{DurableStore, SqliteStore, StoreConfig};
//!
//! let store = SqliteStore::open(StoreConfig::new("reveille.db")).await?;
//! store.put("cursor/battle", "{}").await?;
//! let battles = store.list_by_prefix("queue/battle/").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backend;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod sqlite;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::{DurableStore, StoreEntry};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreConfig};
