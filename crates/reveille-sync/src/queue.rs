//! # Action Queue
//!
//! Ordered, durable log of pending mutations, grouped by entity kind.
//!
//! ## Storage Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ActionQueue                                     │
//! │                                                                         │
//! │  ┌──────────────────────────────┐      ┌──────────────────────────────┐│
//! │  │  in-memory mirror            │      │  DurableStore                ││
//! │  │  key ──► QueuedAction        │ ───► │  queue/{kind}/{micros}/{id}  ││
//! │  │  id  ──► key                 │      │  cursor/{kind}               ││
//! │  │  kind ─► SyncCursor          │      └──────────────────────────────┘│
//! │  └──────────────┬───────────────┘                  ▲                   │
//! │                 │ write failed                     │ flush_deferred()  │
//! │                 ▼                                  │ (next tick)       │
//! │  ┌──────────────────────────────┐                  │                   │
//! │  │  deferred writes             │ ─────────────────┘                   │
//! │  │  key ──► Put(json) | Delete  │                                       │
//! │  └──────────────────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation updates the mirror first and then writes through to the
//! store. A write the store refuses is parked in the deferred buffer (only
//! the latest write per key is kept) and retried by the reconciler on its
//! next tick, so callers never see storage trouble as an error.
//!
//! ## State Machine
//! ```text
//! pending ──mark_syncing──► syncing ──mark_synced──► synced ──purge──► (gone)
//!    ▲                         │
//!    │                    mark_failed (attempts += 1)
//!    │                         ▼
//!    └────────requeue────── failed ──purge──► (gone, max attempts)
//! ```
//!
//! ## Recovery on Open
//! | Persisted state                   | After open                          |
//! |-----------------------------------|-------------------------------------|
//! | `synced`, or equal to the cursor  | purged (acknowledged before crash)  |
//! | `syncing`                         | `pending`, attempts + 1, "interrupted" |
//! | `failed`                          | `pending` (backoff timers were lost)|
//! | `pending`                         | unchanged                           |

use chrono::{DateTime, Utc};
use reveille_core::{
    keys, ActionStatus, EntityId, EntityKind, MonotonicClock, NewAction, OpType, QueuedAction,
    SyncCursor,
};
use reveille_store::{DurableStore, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

/// `last_error` of an action whose submission was cut short by a restart.
pub const INTERRUPTED_REASON: &str = "interrupted";

// =============================================================================
// Supporting Types
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum PendingWrite {
    Put(String),
    Delete,
}

/// How a status change reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persist {
    /// Parked in the deferred buffer if the store refuses it.
    Buffered,
    /// Rejected, with the action left as it was, if the store refuses it.
    Required,
}

/// Counts derived from the queue for diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    /// Creation time of the oldest unsynced action.
    pub oldest_created_at: Option<DateTime<Utc>>,
    /// Writes waiting for the store.
    pub deferred_writes: usize,
    /// Consecutive store writes that failed, reset by the next one that lands.
    pub storage_failure_streak: u32,
}

/// What [`ActionQueue::open`] found in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub restored: usize,
    pub purged_acknowledged: usize,
    pub interrupted: usize,
    pub resumed_failed: usize,
    pub corrupt: usize,
}

#[derive(Default)]
struct QueueState {
    actions: BTreeMap<String, QueuedAction>,
    index: HashMap<String, String>,
    cursors: BTreeMap<EntityKind, SyncCursor>,
    deferred: BTreeMap<String, PendingWrite>,
    failure_streak: u32,
}

impl QueueState {
    fn key_of(&self, id: &str) -> SyncResult<String> {
        self.index
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::ActionNotFound(id.to_string()))
    }

    fn insert(&mut self, key: String, action: QueuedAction) {
        self.index.insert(action.id.clone(), key.clone());
        self.actions.insert(key, action);
    }

    fn remove(&mut self, id: &str) -> SyncResult<(String, QueuedAction)> {
        let key = self.key_of(id)?;
        self.index.remove(id);
        let action = self
            .actions
            .remove(&key)
            .ok_or_else(|| SyncError::ActionNotFound(id.to_string()))?;
        Ok((key, action))
    }
}

fn encode<T: Serialize>(value: &T) -> SyncResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn sorted(mut actions: Vec<QueuedAction>) -> Vec<QueuedAction> {
    actions.sort_by(|a, b| a.queue_order(b));
    actions
}

// =============================================================================
// Action Queue
// =============================================================================

/// Durable, ordered queue of actions awaiting reconciliation.
pub struct ActionQueue {
    store: Arc<dyn DurableStore>,
    clock: MonotonicClock,
    state: Mutex<QueueState>,
    recovery: RecoveryReport,
}

impl ActionQueue {
    /// Loads the queue from the store and applies restart recovery.
    pub async fn open(store: Arc<dyn DurableStore>) -> SyncResult<Self> {
        let mut queue = ActionQueue {
            store,
            clock: MonotonicClock::new(),
            state: Mutex::new(QueueState::default()),
            recovery: RecoveryReport::default(),
        };

        queue.recovery = queue.load().await?;

        info!(
            restored = queue.recovery.restored,
            purged = queue.recovery.purged_acknowledged,
            interrupted = queue.recovery.interrupted,
            corrupt = queue.recovery.corrupt,
            "Action queue opened"
        );

        Ok(queue)
    }

    /// What the last open recovered.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    async fn load(&self) -> SyncResult<RecoveryReport> {
        let cursor_entries = self.store.list_by_prefix(keys::CURSOR_NAMESPACE).await?;
        let action_entries = self.store.list_by_prefix(keys::QUEUE_NAMESPACE).await?;

        let mut report = RecoveryReport::default();
        let mut state = self.state.lock().await;

        for entry in cursor_entries {
            match serde_json::from_str::<SyncCursor>(&entry.value) {
                Ok(cursor) => {
                    state.cursors.insert(cursor.entity_kind.clone(), cursor);
                }
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Skipping corrupt cursor");
                    report.corrupt += 1;
                }
            }
        }

        for entry in action_entries {
            if let Err(e) = keys::parse_action_key(&entry.key) {
                warn!(error = %e, "Skipping foreign key in queue namespace");
                report.corrupt += 1;
                continue;
            }

            let mut action: QueuedAction = match serde_json::from_str(&entry.value) {
                Ok(action) => action,
                Err(e) => {
                    error!(key = %entry.key, error = %e, "Skipping corrupt queued action");
                    report.corrupt += 1;
                    continue;
                }
            };

            self.clock.observe(action.created_at);

            let acknowledged = action.status == ActionStatus::Synced
                || state
                    .cursors
                    .get(&action.entity_kind)
                    .is_some_and(|cursor| cursor.last_action_id == action.id);

            if acknowledged {
                debug!(action_id = %action.id, "Purging action acknowledged before restart");
                self.write(&mut state, entry.key, PendingWrite::Delete).await;
                report.purged_acknowledged += 1;
                continue;
            }

            let rewritten = match action.status {
                ActionStatus::Syncing => {
                    action.attempts += 1;
                    action.last_error = Some(INTERRUPTED_REASON.to_string());
                    report.interrupted += 1;
                    true
                }
                ActionStatus::Failed => {
                    report.resumed_failed += 1;
                    true
                }
                _ => false,
            };

            if rewritten {
                action.status = ActionStatus::Pending;
                action.next_attempt_at = None;
                let value = encode(&action)?;
                self.write(&mut state, entry.key.clone(), PendingWrite::Put(value))
                    .await;
            }

            state.insert(entry.key, action);
            report.restored += 1;
        }

        Ok(report)
    }

    // =========================================================================
    // Write-through
    // =========================================================================

    async fn write(&self, state: &mut QueueState, key: String, write: PendingWrite) {
        let result = match &write {
            PendingWrite::Put(value) => self.store.put(&key, value).await,
            PendingWrite::Delete => self.store.delete(&key).await,
        };

        match result {
            Ok(()) => {
                state.deferred.remove(&key);
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(key = %key, error = %e, "Store write deferred");
                } else {
                    error!(key = %key, error = %e, "Store write failed, deferring");
                }
                state.deferred.insert(key, write);
            }
        }
    }

    async fn write_action(&self, state: &mut QueueState, key: String, action: &QueuedAction) -> SyncResult<()> {
        let value = encode(action)?;
        self.write(state, key, PendingWrite::Put(value)).await;
        Ok(())
    }

    /// Retries deferred writes in key order. Stops at the first failure.
    pub async fn flush_deferred(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        if state.deferred.is_empty() {
            return Ok(0);
        }

        let pending: Vec<(String, PendingWrite)> = state
            .deferred
            .iter()
            .map(|(k, w)| (k.clone(), w.clone()))
            .collect();

        let mut flushed = 0;
        for (key, write) in pending {
            let result = match &write {
                PendingWrite::Put(value) => self.store.put(&key, value).await,
                PendingWrite::Delete => self.store.delete(&key).await,
            };

            if let Err(e) = result {
                state.failure_streak += 1;
                warn!(
                    remaining = state.deferred.len(),
                    streak = state.failure_streak,
                    error = %e,
                    "Deferred writes still blocked"
                );
                return Err(e);
            }

            state.deferred.remove(&key);
            flushed += 1;
        }

        state.failure_streak = 0;
        info!(flushed, "Flushed deferred writes");
        Ok(flushed)
    }

    // =========================================================================
    // Queue Operations
    // =========================================================================

    /// Stamps and persists a new action. Storage trouble defers the write;
    /// the returned record is valid either way.
    pub async fn enqueue(&self, new: NewAction) -> SyncResult<QueuedAction> {
        let mut state = self.state.lock().await;

        let action = QueuedAction::stamp(new, self.clock.now());
        let key = keys::action_key(&action.entity_kind, action.created_at, &action.id);

        self.write_action(&mut state, key.clone(), &action).await?;
        state.insert(key, action.clone());

        debug!(
            action_id = %action.id,
            entity_kind = %action.entity_kind,
            entity_id = %action.entity_id,
            op = %action.op_type,
            "Action enqueued"
        );

        Ok(action)
    }

    /// Pending and failed actions, for one kind or all, in queue order.
    pub async fn drain(&self, kind: Option<&EntityKind>) -> Vec<QueuedAction> {
        self.select(kind, |a| {
            matches!(a.status, ActionStatus::Pending | ActionStatus::Failed)
        })
        .await
    }

    /// Every action not yet acknowledged (pending, syncing, failed).
    pub async fn pending(&self, kind: Option<&EntityKind>) -> Vec<QueuedAction> {
        self.select(kind, |a| a.status != ActionStatus::Synced).await
    }

    async fn select<F>(&self, kind: Option<&EntityKind>, keep: F) -> Vec<QueuedAction>
    where
        F: Fn(&QueuedAction) -> bool,
    {
        let state = self.state.lock().await;
        sorted(
            state
                .actions
                .values()
                .filter(|a| kind.map_or(true, |k| &a.entity_kind == k))
                .filter(|&a| keep(a))
                .cloned()
                .collect(),
        )
    }

    /// Every held action regardless of status.
    pub async fn all(&self) -> Vec<QueuedAction> {
        self.select(None, |_| true).await
    }

    /// Looks up one action by id.
    pub async fn get(&self, id: &str) -> Option<QueuedAction> {
        let state = self.state.lock().await;
        let key = state.index.get(id)?;
        state.actions.get(key).cloned()
    }

    /// Kinds that currently have actions ready to submit.
    pub async fn kinds_with_work(&self) -> Vec<EntityKind> {
        let state = self.state.lock().await;
        state
            .actions
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .map(|a| a.entity_kind.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    async fn transition<F>(
        &self,
        id: &str,
        from: &[ActionStatus],
        to: ActionStatus,
        persist: Persist,
        apply: F,
    ) -> SyncResult<QueuedAction>
    where
        F: FnOnce(&mut QueuedAction),
    {
        let mut state = self.state.lock().await;
        let key = state.key_of(id)?;
        let current = state
            .actions
            .get(&key)
            .ok_or_else(|| SyncError::ActionNotFound(id.to_string()))?;

        if !from.contains(&current.status) {
            return Err(SyncError::InvalidTransition {
                id: id.to_string(),
                from: current.status.to_string(),
                to: to.to_string(),
            });
        }

        let mut updated = current.clone();
        apply(&mut updated);
        updated.status = to;

        match persist {
            Persist::Buffered => {
                state.actions.insert(key.clone(), updated.clone());
                self.write_action(&mut state, key, &updated).await?;
            }
            Persist::Required => {
                let value = encode(&updated)?;
                if let Err(e) = self.store.put(&key, &value).await {
                    state.failure_streak += 1;
                    warn!(
                        action_id = %id,
                        to = %to,
                        streak = state.failure_streak,
                        error = %e,
                        "Transition not persisted, action unchanged"
                    );
                    return Err(e.into());
                }
                state.deferred.remove(&key);
                state.failure_streak = 0;
                state.actions.insert(key, updated.clone());
            }
        }
        Ok(updated)
    }

    /// `pending → syncing`; stamps `last_attempted_at`.
    ///
    /// The new status must reach the store before the action may be
    /// submitted: if the store refuses the write the action stays `pending`
    /// and `SyncError::Storage` is returned.
    pub async fn mark_syncing(&self, id: &str) -> SyncResult<QueuedAction> {
        self.transition(id, &[ActionStatus::Pending], ActionStatus::Syncing, Persist::Required, |a| {
            a.last_attempted_at = Some(Utc::now());
        })
        .await
    }

    /// `syncing → synced`.
    pub async fn mark_synced(&self, id: &str) -> SyncResult<QueuedAction> {
        self.transition(id, &[ActionStatus::Syncing], ActionStatus::Synced, Persist::Buffered, |a| {
            a.last_error = None;
            a.next_attempt_at = None;
        })
        .await
    }

    /// `syncing → failed`; increments `attempts`.
    pub async fn mark_failed(
        &self,
        id: &str,
        reason: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> SyncResult<QueuedAction> {
        self.transition(id, &[ActionStatus::Syncing], ActionStatus::Failed, Persist::Buffered, |a| {
            a.attempts += 1;
            a.last_error = Some(reason.to_string());
            a.next_attempt_at = next_attempt_at;
        })
        .await
    }

    /// `failed → pending`, once the backoff delay has elapsed.
    pub async fn requeue(&self, id: &str) -> SyncResult<QueuedAction> {
        self.transition(id, &[ActionStatus::Failed], ActionStatus::Pending, Persist::Buffered, |a| {
            a.next_attempt_at = None;
        })
        .await
    }

    /// Requeues every failed action whose backoff has elapsed.
    pub async fn requeue_due(&self, now: DateTime<Utc>) -> SyncResult<Vec<String>> {
        let due: Vec<String> = {
            let state = self.state.lock().await;
            state
                .actions
                .values()
                .filter(|a| a.is_due(now))
                .map(|a| a.id.clone())
                .collect()
        };

        let mut requeued = Vec::with_capacity(due.len());
        for id in due {
            match self.requeue(&id).await {
                Ok(_) => requeued.push(id),
                // Raced with a timer or a purge.
                Err(SyncError::InvalidTransition { .. } | SyncError::ActionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(requeued)
    }

    /// Permanently removes an action.
    pub async fn purge(&self, id: &str) -> SyncResult<QueuedAction> {
        let mut state = self.state.lock().await;
        let (key, action) = state.remove(id)?;
        self.write(&mut state, key, PendingWrite::Delete).await;

        debug!(action_id = %id, status = %action.status, "Action purged");
        Ok(action)
    }

    /// Replaces an action with a merged alternative in the same queue slot.
    ///
    /// The replacement keeps `created_at` (and therefore its place in the
    /// lane) but gets a fresh id and attempt budget.
    pub async fn replace(&self, id: &str, op_type: OpType, payload: Value) -> SyncResult<QueuedAction> {
        let mut state = self.state.lock().await;
        let (old_key, old) = state.remove(id)?;

        let merged = QueuedAction {
            id: Uuid::new_v4().to_string(),
            op_type,
            payload,
            attempts: 0,
            status: ActionStatus::Pending,
            last_error: None,
            last_attempted_at: None,
            next_attempt_at: None,
            merged_from: Some(old.id.clone()),
            ..old
        };
        let new_key = keys::action_key(&merged.entity_kind, merged.created_at, &merged.id);

        self.write_action(&mut state, new_key.clone(), &merged).await?;
        self.write(&mut state, old_key, PendingWrite::Delete).await;
        state.insert(new_key, merged.clone());

        debug!(old_id = %id, new_id = %merged.id, "Action replaced by merge");
        Ok(merged)
    }

    /// Points every queued action of `kind` at `to` instead of `from`.
    pub async fn rewrite_entity_id(&self, kind: &EntityKind, from: &EntityId, to: &EntityId) -> SyncResult<usize> {
        let mut state = self.state.lock().await;

        let matching: Vec<String> = state
            .actions
            .iter()
            .filter(|(_, a)| &a.entity_kind == kind && &a.entity_id == from)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &matching {
            let updated = match state.actions.get_mut(key) {
                Some(action) => {
                    action.entity_id = to.clone();
                    action.clone()
                }
                None => continue,
            };
            self.write_action(&mut state, key.clone(), &updated).await?;
        }

        if !matching.is_empty() {
            info!(
                entity_kind = %kind,
                from = %from,
                to = %to,
                count = matching.len(),
                "Rewrote temporary entity id"
            );
        }
        Ok(matching.len())
    }

    // =========================================================================
    // Cursors
    // =========================================================================

    /// Records `action` as the kind's last acknowledged action.
    pub async fn advance_cursor(&self, action: &QueuedAction) -> SyncResult<SyncCursor> {
        let mut state = self.state.lock().await;

        let cursor = SyncCursor {
            entity_kind: action.entity_kind.clone(),
            last_action_id: action.id.clone(),
            last_created_at: action.created_at,
            updated_at: Utc::now(),
        };

        let value = encode(&cursor)?;
        self.write(&mut state, keys::cursor_key(&cursor.entity_kind), PendingWrite::Put(value))
            .await;
        state.cursors.insert(cursor.entity_kind.clone(), cursor.clone());

        Ok(cursor)
    }

    pub async fn load_cursor(&self, kind: &EntityKind) -> Option<SyncCursor> {
        self.state.lock().await.cursors.get(kind).cloned()
    }

    pub async fn cursors(&self) -> Vec<SyncCursor> {
        self.state.lock().await.cursors.values().cloned().collect()
    }

    /// Latest cursor movement across all kinds.
    pub async fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .cursors
            .values()
            .map(|c| c.updated_at)
            .max()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Drops every action and cursor, in memory and in the store.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.lock().await;

        let action_keys: Vec<String> = state.actions.keys().cloned().collect();
        let cursor_keys: Vec<String> = state.cursors.keys().map(keys::cursor_key).collect();
        let removed = action_keys.len();

        state.actions.clear();
        state.index.clear();
        state.cursors.clear();
        state.deferred.clear();

        for (namespace, known) in [
            (keys::QUEUE_NAMESPACE, action_keys),
            (keys::CURSOR_NAMESPACE, cursor_keys),
        ] {
            if let Err(e) = self.store.delete_prefix(namespace).await {
                warn!(namespace, error = %e, "Namespace clear deferred");
                for key in known {
                    state.deferred.insert(key, PendingWrite::Delete);
                }
            }
        }

        info!(removed, "Action queue cleared");
        removed
    }

    /// Counts for diagnostics.
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            deferred_writes: state.deferred.len(),
            storage_failure_streak: state.failure_streak,
            ..Default::default()
        };

        for action in state.actions.values() {
            match action.status {
                ActionStatus::Pending => stats.pending += 1,
                ActionStatus::Syncing => stats.syncing += 1,
                ActionStatus::Failed => stats.failed += 1,
                ActionStatus::Synced => continue,
            }
            stats.oldest_created_at = Some(match stats.oldest_created_at {
                Some(oldest) => oldest.min(action.created_at),
                None => action.created_at,
            });
        }

        stats
    }

    /// Whether the backing store currently answers.
    pub async fn store_healthy(&self) -> bool {
        self.store.health_check().await
    }

    /// Number of actions held (any status).
    pub async fn len(&self) -> usize {
        self.state.lock().await.actions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.actions.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
