//! # Domain Types
//!
//! Core types shared by the queue, the reconciler and the UI layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   NewAction     │──►│  QueuedAction   │──►│ ConflictRecord  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  entity_kind    │   │  id (UUID v4)   │   │  action         │       │
//! │  │  entity_id      │   │  created_at     │   │  reason         │       │
//! │  │  op_type        │   │  attempts       │   │  resolution     │       │
//! │  │  payload        │   │  status         │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SyncCursor    │   │    Outcome      │   │ HealthSnapshot  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  per kind       │   │  Accepted       │   │  derived, never │       │
//! │  │  last acked id  │   │  Rejected       │   │  persisted      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//! Actions are ordered by `(created_at, id)`. `created_at` comes from the
//! queue's [`MonotonicClock`](crate::clock::MonotonicClock), so two actions
//! enqueued in one process never share a timestamp; the `id` tie-break only
//! matters for records written by different processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::CoreError;
use crate::validation::{validate_entity_id, validate_entity_kind, ValidationResult};

// =============================================================================
// Entity Kind
// =============================================================================

/// Tag distinguishing domains (`battle`, `analyticsEvent`, `sleepSession`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct EntityKind(String);

impl EntityKind {
    /// Creates a validated entity kind.
    pub fn new(kind: impl Into<String>) -> ValidationResult<Self> {
        let kind = kind.into();
        validate_entity_kind(&kind)?;
        Ok(EntityKind(kind))
    }

    /// Returns the kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Entity Id
// =============================================================================

/// Prefix of locally generated entity ids awaiting a canonical server id.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// The logical object an action targets.
///
/// Starts life as a temporary id (`tmp-<uuid>`) when the entity is created
/// offline; the reconciler rewrites it once the server assigns one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct EntityId(String);

impl EntityId {
    /// Creates a validated entity id.
    pub fn new(id: impl Into<String>) -> ValidationResult<Self> {
        let id = id.into();
        validate_entity_id(&id)?;
        Ok(EntityId(id))
    }

    /// Generates a fresh temporary id for an entity created offline.
    pub fn temporary() -> Self {
        EntityId(format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4()))
    }

    /// Returns true if the server has not assigned a canonical id yet.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Operation Type
// =============================================================================

/// Mutation verb. Domain-specific verbs (track, log, ...) map onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Create,
    Update,
    Join,
    Delete,
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpType::Create => write!(f, "create"),
            OpType::Update => write!(f, "update"),
            OpType::Join => write!(f, "join"),
            OpType::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for OpType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OpType::Create),
            "update" | "track" | "log" => Ok(OpType::Update),
            "join" => Ok(OpType::Join),
            "delete" | "remove" => Ok(OpType::Delete),
            other => Err(CoreError::UnknownOpType(other.to_string())),
        }
    }
}

// =============================================================================
// Action Status
// =============================================================================

/// Lifecycle status of a queued action.
///
/// ```text
/// pending ──► syncing ──► synced (terminal)
///    ▲           │
///    │           ▼
///    └─────── failed ──► purged (terminal, after max attempts)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Syncing,
    Failed,
    Synced,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Syncing => write!(f, "syncing"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Synced => write!(f, "synced"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "syncing" => Ok(ActionStatus::Syncing),
            "failed" => Ok(ActionStatus::Failed),
            "synced" => Ok(ActionStatus::Synced),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// =============================================================================
// New Action
// =============================================================================

/// The caller-supplied part of an action, before the queue stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub op_type: OpType,
    pub payload: Value,
}

impl NewAction {
    /// Builds a new action from raw façade arguments, validating the keys.
    ///
    /// ## Example
    /// ```rust
    /// use reveille_core::{NewAction, OpType};
    ///
    /// let action = NewAction::new("battle", OpType::Create, "tmp-1", serde_json::json!({})).unwrap();
    /// assert_eq!(action.entity_kind.as_str(), "battle");
    /// assert!(NewAction::new("", OpType::Create, "tmp-1", serde_json::Value::Null).is_err());
    /// ```
    pub fn new(
        entity_kind: &str,
        op_type: OpType,
        entity_id: &str,
        payload: Value,
    ) -> ValidationResult<Self> {
        Ok(NewAction {
            entity_kind: EntityKind::new(entity_kind)?,
            entity_id: EntityId::new(entity_id)?,
            op_type,
            payload,
        })
    }
}

// =============================================================================
// Queued Action
// =============================================================================

/// A mutation waiting to be applied to the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    /// Unique identifier (UUID v4); the remote uses it for idempotency.
    pub id: String,

    pub entity_kind: EntityKind,

    pub entity_id: EntityId,

    pub op_type: OpType,

    /// Domain-owned data, never inspected by the engine.
    #[ts(type = "unknown")]
    pub payload: Value,

    /// Ordering timestamp (microsecond precision, monotonic per process).
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Failed submissions so far.
    pub attempts: u32,

    pub status: ActionStatus,

    /// Reason of the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,

    /// When the action was last handed to the remote. `None` = never submitted.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub last_attempted_at: Option<DateTime<Utc>>,

    /// When a failed action becomes due for another attempt.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Id of the action this one replaced through a merge resolution.
    #[serde(default)]
    pub merged_from: Option<String>,
}

impl QueuedAction {
    /// Stamps a new action with an id and a creation timestamp.
    pub fn stamp(action: NewAction, created_at: DateTime<Utc>) -> Self {
        QueuedAction {
            id: Uuid::new_v4().to_string(),
            entity_kind: action.entity_kind,
            entity_id: action.entity_id,
            op_type: action.op_type,
            payload: action.payload,
            created_at,
            attempts: 0,
            status: ActionStatus::Pending,
            last_error: None,
            last_attempted_at: None,
            next_attempt_at: None,
            merged_from: None,
        }
    }

    /// Returns true if this action has never been handed to the remote.
    pub fn never_submitted(&self) -> bool {
        self.last_attempted_at.is_none()
    }

    /// Returns true if the reconciler may submit this action now.
    pub fn is_ready(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    /// Returns true if this is a failed action whose backoff has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ActionStatus::Failed && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Queue order: `created_at` ascending, ties broken by `id`.
    pub fn queue_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

// =============================================================================
// Sync Cursor
// =============================================================================

/// Last acknowledged action for one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub entity_kind: EntityKind,
    pub last_action_id: String,
    #[ts(as = "String")]
    pub last_created_at: DateTime<Utc>,
    /// When the cursor last moved (i.e. the last successful sync for this kind).
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Conflicts & Failures
// =============================================================================

/// How a conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The losing action was removed and surfaced.
    Dropped,
    /// The action was put back on the backoff path.
    Retried,
    /// The action was replaced by a domain-supplied alternative.
    Merged,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Dropped => write!(f, "dropped"),
            Resolution::Retried => write!(f, "retried"),
            Resolution::Merged => write!(f, "merged"),
        }
    }
}

/// A non-retryable rejection and what the engine did about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub action: QueuedAction,
    pub reason: String,
    pub resolution: Resolution,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

/// An action purged after exhausting its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PermanentFailure {
    pub action: QueuedAction,
    pub last_error: String,
    #[ts(as = "String")]
    pub failed_at: DateTime<Utc>,
}

// =============================================================================
// Remote Outcome
// =============================================================================

/// What the server returned for an accepted action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    /// Canonical id assigned by the server, if it differs from the local one.
    pub canonical_entity_id: Option<String>,
    /// Authoritative entity state, handed back to the domain untouched.
    pub data: Value,
}

/// The remote collaborator's answer to one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Accepted(ServerState),
    Rejected { reason: String, retryable: bool },
}

impl Outcome {
    /// Accepted without a canonical id change.
    pub fn accepted() -> Self {
        Outcome::Accepted(ServerState::default())
    }

    /// Accepted, and the server assigned `canonical_id` to the entity.
    pub fn accepted_as(canonical_id: impl Into<String>) -> Self {
        Outcome::Accepted(ServerState {
            canonical_entity_id: Some(canonical_id.into()),
            data: Value::Null,
        })
    }

    /// Transient rejection; the action will be retried after backoff.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Outcome::Rejected {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Genuine conflict; the conflict policy decides what happens.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Outcome::Rejected {
            reason: reason.into(),
            retryable: false,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Read-only health view for diagnostics panels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub pending_count: usize,
    pub failed_count: usize,
    pub syncing_count: usize,
    #[ts(as = "Option<String>")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Age of the oldest unsynced action in milliseconds.
    pub oldest_pending_age_ms: Option<i64>,
    /// Actions purged after exhausting retries since the engine started.
    pub permanent_failures: usize,
    /// Conflict records produced since the engine started.
    pub conflicts: usize,
    /// Enqueued actions still waiting for the store to accept them.
    pub deferred_writes: usize,
    pub is_online: bool,
    /// Storage has been failing for several consecutive ticks.
    pub storage_degraded: bool,
}

/// Counts for one completed drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub permanent_failures: usize,
    /// Actions removed by the create…delete collapse without submission.
    pub collapsed: usize,
    /// Entity kinds skipped because a drain was already in flight.
    pub skipped_kinds: usize,
    /// The cycle did not run because the device is offline.
    pub offline: bool,
}

impl SyncSummary {
    /// Adds the counts of another summary into this one.
    pub fn absorb(&mut self, other: SyncSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
        self.permanent_failures += other.permanent_failures;
        self.collapsed += other.collapsed;
        self.skipped_kinds += other.skipped_kinds;
        self.offline |= other.offline;
    }

    /// Total number of submissions made during the cycle.
    pub fn submitted(&self) -> usize {
        self.succeeded + self.failed + self.conflicts
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
