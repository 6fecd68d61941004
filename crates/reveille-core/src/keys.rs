//! # Store Key Layout
//!
//! Every record the engine persists lives under one of two namespaces.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Durable Store Key Space                          │
//! │                                                                         │
//! │  queue/{kind}/{created_at_micros:020}/{id}   ──► QueuedAction (JSON)    │
//! │  cursor/{kind}                               ──► SyncCursor   (JSON)    │
//! │                                                                         │
//! │  queue/battle/00001718000000000001/3f2a...                              │
//! │  queue/battle/00001718000000000002/91bc...   lexicographic order        │
//! │  queue/sleepSession/00001718000000000003/..  == (created_at, id) order  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The timestamp is zero-padded to 20 digits so that string order equals
//! numeric order, which lets `list_by_prefix` return actions in queue order
//! without an in-memory sort.

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::EntityKind;

/// Namespace holding the per-kind action logs.
pub const QUEUE_NAMESPACE: &str = "queue/";

/// Namespace holding sync cursors.
pub const CURSOR_NAMESPACE: &str = "cursor/";

/// Key of a single queued action.
pub fn action_key(kind: &EntityKind, created_at: DateTime<Utc>, id: &str) -> String {
    format!(
        "{}{}/{:020}/{}",
        QUEUE_NAMESPACE,
        kind,
        created_at.timestamp_micros().max(0),
        id
    )
}

/// Key of a kind's sync cursor.
pub fn cursor_key(kind: &EntityKind) -> String {
    format!("{}{}", CURSOR_NAMESPACE, kind)
}

/// Components of an action key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionKey {
    pub entity_kind: String,
    pub created_at_micros: i64,
    pub id: String,
}

/// Parses a key produced by [`action_key`].
pub fn parse_action_key(key: &str) -> CoreResult<ActionKey> {
    let malformed = || CoreError::MalformedKey(key.to_string());

    let rest = key.strip_prefix(QUEUE_NAMESPACE).ok_or_else(malformed)?;
    let mut parts = rest.splitn(3, '/');

    let kind = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
    let micros = parts
        .next()
        .filter(|s| s.len() == 20)
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(malformed)?;
    let id = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;

    Ok(ActionKey {
        entity_kind: kind.to_string(),
        created_at_micros: micros,
        id: id.to_string(),
    })
}
