//! # Conflict Policies
//!
//! What happens when the server rejects an action as a genuine conflict
//! (`Rejected { retryable: false }`).
//!
//! ## Resolution Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Conflict Resolution                                 │
//! │                                                                         │
//! │   Rejected(reason, retryable=false)                                    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ConflictPolicies::handler_for(kind)  ── none registered ──► DropPolicy │
//! │        │                                                                │
//! │        ├── Drop   ──► purge, ConflictRecord { dropped }                 │
//! │        ├── Retry  ──► backoff path, ConflictRecord { retried }          │
//! │        └── Merge  ──► replace with new action (same slot in the lane),  │
//! │                       ConflictRecord { merged }                         │
//! │                                                                         │
//! │   A merged action that conflicts again is always dropped.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example: battle full while a join was queued
//! ```rust
//! use reveille_sync::conflict::{ConflictHandler, ConflictResolution, SpectatorFallback};
//! use reveille_core::{NewAction, OpType, QueuedAction};
//!
//! let join = QueuedAction::stamp(
//!     NewAction::new("battle", OpType::Join, "b-1", serde_json::json!({"user": "u-7"})).unwrap(),
//!     chrono::Utc::now(),
//! );
//! match SpectatorFallback.resolve(&join, "battle full") {
//!     ConflictResolution::Merge { payload, .. } => assert_eq!(payload["role"], "spectator"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use reveille_core::{EntityKind, OpType, QueuedAction};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Decision returned by a [`ConflictHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Remove the losing action and surface it.
    Drop,
    /// Treat the conflict as transient and retry after backoff.
    Retry,
    /// Replace the action with a domain-supplied alternative.
    Merge { op_type: OpType, payload: Value },
}

/// Entity-specific conflict policy.
pub trait ConflictHandler: Send + Sync {
    fn resolve(&self, action: &QueuedAction, reason: &str) -> ConflictResolution;
}

impl<F> ConflictHandler for F
where
    F: Fn(&QueuedAction, &str) -> ConflictResolution + Send + Sync,
{
    fn resolve(&self, action: &QueuedAction, reason: &str) -> ConflictResolution {
        self(action, reason)
    }
}

/// Default policy: drop the losing action.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropPolicy;

impl ConflictHandler for DropPolicy {
    fn resolve(&self, _action: &QueuedAction, _reason: &str) -> ConflictResolution {
        ConflictResolution::Drop
    }
}

/// Battle policy: a rejected `join` is re-queued as a spectator join.
/// Anything else is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpectatorFallback;

impl ConflictHandler for SpectatorFallback {
    fn resolve(&self, action: &QueuedAction, _reason: &str) -> ConflictResolution {
        if action.op_type != OpType::Join {
            return ConflictResolution::Drop;
        }

        let mut payload = match &action.payload {
            Value::Object(map) => Value::Object(map.clone()),
            Value::Null => Value::Object(Default::default()),
            other => serde_json::json!({ "original": other.clone() }),
        };
        payload["role"] = Value::String("spectator".to_string());

        ConflictResolution::Merge {
            op_type: OpType::Join,
            payload,
        }
    }
}

/// Registry of conflict handlers keyed by entity kind.
pub struct ConflictPolicies {
    handlers: RwLock<HashMap<EntityKind, Arc<dyn ConflictHandler>>>,
    fallback: Arc<dyn ConflictHandler>,
}

impl Default for ConflictPolicies {
    fn default() -> Self {
        ConflictPolicies {
            handlers: RwLock::new(HashMap::new()),
            fallback: Arc::new(DropPolicy),
        }
    }
}

impl ConflictPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for one kind.
    pub async fn register(&self, kind: EntityKind, handler: Arc<dyn ConflictHandler>) {
        self.handlers.write().await.insert(kind, handler);
    }

    /// Returns the kind's handler, or the drop policy.
    pub async fn handler_for(&self, kind: &EntityKind) -> Arc<dyn ConflictHandler> {
        self.handlers
            .read()
            .await
            .get(kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reveille_core::NewAction;
    use serde_json::json;

    fn action(op: OpType, payload: Value) -> QueuedAction {
        QueuedAction::stamp(
            NewAction::new("battle", op, "b-1", payload).unwrap(),
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_unregistered_kind_drops() {
        let policies = ConflictPolicies::new();
        let handler = policies.handler_for(&EntityKind::new("battle").unwrap()).await;
        assert_eq!(
            handler.resolve(&action(OpType::Join, json!({})), "full"),
            ConflictResolution::Drop
        );
    }

    #[tokio::test]
    async fn test_registered_closure_handler() {
        let policies = ConflictPolicies::new();
        policies
            .register(
                EntityKind::new("sleepSession").unwrap(),
                Arc::new(|_: &QueuedAction, _: &str| ConflictResolution::Retry),
            )
            .await;

        let handler = policies
            .handler_for(&EntityKind::new("sleepSession").unwrap())
            .await;
        assert_eq!(
            handler.resolve(&action(OpType::Update, json!({})), "stale"),
            ConflictResolution::Retry
        );
    }

    #[test]
    fn test_spectator_fallback_keeps_payload() {
        let join = action(OpType::Join, json!({"user": "u-1"}));
        match SpectatorFallback.resolve(&join, "battle full") {
            ConflictResolution::Merge { op_type, payload } => {
                assert_eq!(op_type, OpType::Join);
                assert_eq!(payload["user"], "u-1");
                assert_eq!(payload["role"], "spectator");
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[test]
    fn test_spectator_fallback_drops_non_joins() {
        let create = action(OpType::Create, json!({}));
        assert_eq!(
            SpectatorFallback.resolve(&create, "duplicate"),
            ConflictResolution::Drop
        );
    }
}
