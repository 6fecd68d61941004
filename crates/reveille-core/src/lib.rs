//! # reveille-core: Pure Data Model for the Offline Action Queue
//!
//! Types, validation and key layout shared by every layer of the engine.
//! Nothing in this crate touches storage, the network or timers.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Reveille Offline Engine                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                      UI Layer (external)                        │   │
//! │  │   create battle ──► join battle ──► track event ──► log sleep   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ SyncEngine façade                      │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 reveille-sync (engine layer)                    │   │
//! │  │   ActionQueue • NetworkMonitor • Reconciler • Diagnostics       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ reveille-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   keys    │  │   clock   │  │ validation│  │   │
//! │  │   │ Queued-   │  │ queue/... │  │ monotonic │  │ kind + id │  │   │
//! │  │   │ Action    │  │ cursor/...│  │ micros    │  │   rules   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Actions, cursors, conflicts, outcomes, reports
//! - [`keys`] - Durable Store key layout (sorts by `created_at`, then `id`)
//! - [`clock`] - Strictly increasing timestamps for ordering
//! - [`error`] - Domain error types
//! - [`validation`] - Entity kind and id rules
//!
//! ## Example Usage
//!
//! ```rust
//! use reveille_core::{keys, MonotonicClock, NewAction, OpType, QueuedAction};
//!
//! let clock = MonotonicClock::new();
//! let new = NewAction::new("battle", OpType::Create, "tmp-1", serde_json::json!({})).unwrap();
//! let action = QueuedAction::stamp(new, clock.now());
//!
//! let key = keys::action_key(&action.entity_kind, action.created_at, &action.id);
//! assert!(key.starts_with("queue/battle/"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod keys;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::MonotonicClock;
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Constants
// =============================================================================

/// Maximum length of an entity kind tag.
pub const MAX_ENTITY_KIND_LEN: usize = 64;

/// Maximum length of an entity id.
pub const MAX_ENTITY_ID_LEN: usize = 128;

/// Entity kinds used by the client's offline services.
pub mod kinds {
    /// Battles (create / join).
    pub const BATTLE: &str = "battle";

    /// Analytics events (track).
    pub const ANALYTICS_EVENT: &str = "analyticsEvent";

    /// Sleep sessions (log / update).
    pub const SLEEP_SESSION: &str = "sleepSession";
}
