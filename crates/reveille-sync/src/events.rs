//! # Sync Events
//!
//! Notifications the engine pushes to the UI layer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Event Delivery                                   │
//! │                                                                         │
//! │  Reconciler / NetworkMonitor                                           │
//! │       │ publish(SyncEvent)                                              │
//! │       ▼                                                                 │
//! │  EventBus ──► SyncEventEmitter (host integration, e.g. a webview)      │
//! │          └──► broadcast::Sender (in-process subscribers)               │
//! │                                                                         │
//! │  EVENTS:                                                               │
//! │  "sync://complete"     - { succeeded, failed, conflicts }              │
//! │  "sync://conflict"     - ConflictRecord                                │
//! │  "sync://failure"      - PermanentFailure                              │
//! │  "sync://connectivity" - { online }                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use reveille_core::{ConflictRecord, PermanentFailure, SyncSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use ts_rs::TS;

pub const SYNC_COMPLETE_EVENT: &str = "sync://complete";
pub const SYNC_CONFLICT_EVENT: &str = "sync://conflict";
pub const SYNC_FAILURE_EVENT: &str = "sync://failure";
pub const SYNC_CONNECTIVITY_EVENT: &str = "sync://connectivity";

/// Broadcast buffer; slow subscribers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Sync Event
// =============================================================================

/// Engine notification for UI consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Fired once per completed drain cycle.
    SyncCompleted {
        succeeded: usize,
        failed: usize,
        conflicts: usize,
    },

    Conflict { record: ConflictRecord },

    PermanentFailure { failure: PermanentFailure },

    Connectivity { online: bool },
}

impl SyncEvent {
    /// Event name used by host integrations.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::SyncCompleted { .. } => SYNC_COMPLETE_EVENT,
            SyncEvent::Conflict { .. } => SYNC_CONFLICT_EVENT,
            SyncEvent::PermanentFailure { .. } => SYNC_FAILURE_EVENT,
            SyncEvent::Connectivity { .. } => SYNC_CONNECTIVITY_EVENT,
        }
    }

    pub fn completed(summary: &SyncSummary) -> Self {
        SyncEvent::SyncCompleted {
            succeeded: summary.succeeded,
            failed: summary.failed,
            conflicts: summary.conflicts,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for pushing events into a host (implemented by UI integrations).
pub trait SyncEventEmitter: Send + Sync {
    fn emit(&self, name: &str, event: &SyncEvent);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit(&self, _name: &str, _event: &SyncEvent) {}
}

// =============================================================================
// Event Bus
// =============================================================================

/// Fans events out to the host emitter and in-process subscribers.
pub struct EventBus {
    emitter: Arc<dyn SyncEventEmitter>,
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(emitter: Arc<dyn SyncEventEmitter>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { emitter, tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        trace!(event = event.name(), "Publishing sync event");
        self.emitter.emit(event.name(), &event);
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl SyncEventEmitter for Recorder {
        fn emit(&self, name: &str, _event: &SyncEvent) {
            self.0.lock().unwrap().push(name.to_string());
        }
    }

    #[test]
    fn test_event_names() {
        let event = SyncEvent::completed(&SyncSummary::default());
        assert_eq!(event.name(), "sync://complete");
        assert_eq!(
            SyncEvent::Connectivity { online: true }.name(),
            "sync://connectivity"
        );
    }

    #[test]
    fn test_completed_payload_shape() {
        let summary = SyncSummary {
            succeeded: 3,
            failed: 1,
            conflicts: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(SyncEvent::completed(&summary)).unwrap();
        assert_eq!(json["type"], "sync_completed");
        assert_eq!(json["succeeded"], 3);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["conflicts"], 2);
    }

    #[tokio::test]
    async fn test_bus_reaches_emitter_and_subscribers() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let bus = EventBus::new(recorder.clone());
        let mut rx = bus.subscribe();

        bus.publish(SyncEvent::Connectivity { online: false });

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::Connectivity { online: false });
        assert_eq!(*recorder.0.lock().unwrap(), vec!["sync://connectivity"]);
    }
}
