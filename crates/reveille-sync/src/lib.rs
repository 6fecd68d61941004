//! # reveille-sync: Offline Action Queue & Sync Engine
//!
//! Lets the UI mutate data while offline. Every mutation becomes a durable
//! queued action that is submitted to the remote system, in order per
//! entity, once connectivity returns.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SyncEngine (façade)                            │  │
//! │  │                                                                  │  │
//! │  │  Built by the composition root, shared through an Arc            │  │
//! │  │  enqueue_action → QueuedAction returned immediately              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  ActionQueue   │  │  Reconciler    │  │  NetworkMonitor        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Write-through  │  │ Per-entity     │  │ Debounced connectivity │    │
//! │  │ to DurableStore│  │ lanes, backoff │  │ with change listeners  │    │
//! │  │ Deferred writes│  │ conflicts      │  │                        │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                     RemoteApply (injected)                              │
//! │                                                                         │
//! │  EVENTS (to the UI via SyncEventEmitter and broadcast):                │
//! │  • "sync://complete"     - once per drain cycle                        │
//! │  • "sync://conflict"     - a non-retryable rejection was resolved      │
//! │  • "sync://failure"      - an action ran out of attempts               │
//! │  • "sync://connectivity" - debounced online/offline change             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `SyncEngine` façade, builder and background loop
//! - [`queue`] - Durable ordered action queue with restart recovery
//! - [`reconciler`] - Drain cycles, retry policy, conflict resolution
//! - [`network`] - Debounced connectivity monitor
//! - [`diagnostics`] - Health snapshots
//! - [`conflict`] - Per-kind conflict handlers
//! - [`remote`] - The `RemoteApply` submission contract
//! - [`events`] - Events pushed to the UI
//! - [`config`] - Engine configuration (TOML + env)
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reveille_sync::{EngineConfig, SyncEngineBuilder};
//!
//! let engine = SyncEngineBuilder::new(EngineConfig::load_or_default(None))
//!     .with_remote(remote)
//!     .build()
//!     .await?;
//! engine.start()?;
//!
//! engine.network().report(true);
//! let health = engine.get_health_snapshot().await;
//! println!("Pending: {}", health.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod conflict;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod events;
pub mod network;
pub mod queue;
pub mod reconciler;
pub mod remote;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::EngineConfig;
pub use conflict::{ConflictHandler, ConflictPolicies, ConflictResolution, DropPolicy, SpectatorFallback};
pub use diagnostics::DiagnosticsReporter;
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, NoOpEmitter, SyncEvent, SyncEventEmitter};
pub use network::{NetworkMonitor, Subscription};
pub use queue::{ActionQueue, QueueStats, RecoveryReport};
pub use reconciler::{Reconciler, ReconcilerStats};
pub use remote::{RemoteApply, RemoteError, UnreachableRemote};
