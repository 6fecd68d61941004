//! # Sync Engine
//!
//! Façade the UI layer talks to. Owns the queue, reconciler, network
//! monitor and diagnostics, and runs the background drain loop.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncEngine Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncEngine                               │  │
//! │  │                                                                  │  │
//! │  │  • enqueue_action / get_pending_actions / get_health_snapshot   │  │
//! │  │  • sync_now, clear_queue, register_conflict_handler              │  │
//! │  │  • start(): background loop, shutdown(): stops it                │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  ActionQueue   │  │   Reconciler   │  │   NetworkMonitor       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Durable,       │  │ Lanes, retry,  │  │ Debounced online /     │    │
//! │  │ ordered        │  │ conflicts      │  │ offline signal         │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  BACKGROUND LOOP WAKES ON:                                             │
//! │  ─────────────────────────                                             │
//! │  • offline → online transition                                         │
//! │  • poll interval tick (if online)                                      │
//! │  • backoff timer expiry (if online)                                    │
//! │  • enqueue while online                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let engine = SyncEngineBuilder::new(EngineConfig::load_or_default(None))
//!     .with_remote(Arc::new(HttpRemote::new(client)))
//!     .with_emitter(Arc::new(WebviewEmitter::new(window)))
//!     .build()
//!     .await?;
//! engine.start()?;
//!
//! engine
//!     .enqueue_action("battle", OpType::Create, EntityId::temporary().as_str(), json!({"name": "Dawn"}))
//!     .await?;
//! ```

use reveille_core::{
    ConflictRecord, EntityKind, HealthSnapshot, NewAction, OpType, PermanentFailure,
    QueuedAction, SyncCursor, SyncSummary,
};
use reveille_store::{DurableStore, SqliteStore, StoreConfig};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::conflict::{ConflictHandler, ConflictPolicies};
use crate::diagnostics::DiagnosticsReporter;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, NoOpEmitter, SyncEvent, SyncEventEmitter};
use crate::network::{NetworkMonitor, Subscription};
use crate::queue::ActionQueue;
use crate::reconciler::Reconciler;
use crate::remote::RemoteApply;

struct LoopHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// The offline action queue and sync engine.
///
/// Construct with [`SyncEngineBuilder`] and share through an `Arc`.
pub struct SyncEngine {
    config: Arc<EngineConfig>,
    queue: Arc<ActionQueue>,
    reconciler: Arc<Reconciler>,
    policies: Arc<ConflictPolicies>,
    events: Arc<EventBus>,
    network: Arc<NetworkMonitor>,
    diagnostics: DiagnosticsReporter,
    background: Mutex<Option<LoopHandle>>,
    _connectivity: Subscription,
}

impl SyncEngine {
    // =========================================================================
    // Façade
    // =========================================================================

    /// Records a mutation for later submission.
    ///
    /// Returns the stored record immediately, online or not. Only a
    /// malformed kind or entity id is an error.
    pub async fn enqueue_action(
        &self,
        entity_kind: &str,
        op_type: OpType,
        entity_id: &str,
        payload: Value,
    ) -> SyncResult<QueuedAction> {
        let action = NewAction::new(entity_kind, op_type, entity_id, payload)?;
        let queued = self.queue.enqueue(action).await?;

        if self.network.is_online() {
            self.reconciler.wakeup().notify_one();
        }
        Ok(queued)
    }

    /// [`enqueue_action`](Self::enqueue_action) with a typed payload.
    pub async fn enqueue_typed<T: Serialize>(
        &self,
        entity_kind: &str,
        op_type: OpType,
        entity_id: &str,
        payload: &T,
    ) -> SyncResult<QueuedAction> {
        let payload = serde_json::to_value(payload)?;
        self.enqueue_action(entity_kind, op_type, entity_id, payload)
            .await
    }

    /// Unsynced actions (pending, syncing or failed), oldest first.
    pub async fn get_pending_actions(&self, entity_kind: Option<&str>) -> SyncResult<Vec<QueuedAction>> {
        let kind = entity_kind.map(EntityKind::new).transpose()?;
        Ok(self.queue.pending(kind.as_ref()).await)
    }

    pub async fn get_health_snapshot(&self) -> HealthSnapshot {
        self.diagnostics.snapshot().await
    }

    /// Last acknowledged action per kind, or for one kind.
    pub async fn get_sync_cursors(&self, entity_kind: Option<&str>) -> SyncResult<Vec<SyncCursor>> {
        match entity_kind {
            Some(kind) => {
                let kind = EntityKind::new(kind)?;
                Ok(self.queue.load_cursor(&kind).await.into_iter().collect())
            }
            None => Ok(self.queue.cursors().await),
        }
    }

    /// Runs one drain cycle now. Offline, nothing is submitted and the
    /// summary says so.
    pub async fn sync_now(&self) -> SyncSummary {
        if !self.network.is_online() {
            debug!("Sync requested while offline, skipping");
            return SyncSummary {
                offline: true,
                ..Default::default()
            };
        }
        self.reconciler.run_cycle().await
    }

    /// Installs the conflict policy for one entity kind.
    pub async fn register_conflict_handler<H>(&self, entity_kind: &str, handler: H) -> SyncResult<()>
    where
        H: ConflictHandler + 'static,
    {
        let kind = EntityKind::new(entity_kind)?;
        info!(entity_kind = %kind, "Conflict handler registered");
        self.policies.register(kind, Arc::new(handler)).await;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn network(&self) -> Arc<NetworkMonitor> {
        self.network.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Recent conflicts, oldest first.
    pub async fn conflicts(&self) -> Vec<ConflictRecord> {
        self.reconciler.stats().await.conflicts
    }

    /// Recent permanent failures, oldest first.
    pub async fn permanent_failures(&self) -> Vec<PermanentFailure> {
        self.reconciler.stats().await.permanent_failures
    }

    /// Drops every queued action and cursor (logout). Submissions still in
    /// flight are ignored when they complete.
    pub async fn clear_queue(&self) -> usize {
        self.reconciler.clear().await
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Starts the background drain loop. Calling it twice is a no-op.
    pub fn start(&self) -> SyncResult<()> {
        let mut background = self
            .background
            .lock()
            .map_err(|_| SyncError::Internal("background handle poisoned".into()))?;

        if background.is_some() {
            debug!("Engine already started");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(Self::run_loop(
            self.reconciler.clone(),
            self.network.clone(),
            self.network.subscribe(),
            self.config.poll_interval(),
            shutdown_rx,
        ));

        *background = Some(LoopHandle { shutdown_tx, task });
        info!(
            online = self.network.is_online(),
            poll_secs = self.config.reconciler.poll_interval_secs,
            "Sync engine started"
        );
        Ok(())
    }

    /// Stops the background loop and waits for it to finish.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let handle = self
            .background
            .lock()
            .map_err(|_| SyncError::Internal("background handle poisoned".into()))?
            .take();

        let Some(handle) = handle else {
            return Ok(());
        };

        info!("Shutting down sync engine");
        // The loop may already be gone.
        let _ = handle.shutdown_tx.send(()).await;
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Background loop ended abnormally");
        }
        Ok(())
    }

    async fn run_loop(
        reconciler: Arc<Reconciler>,
        network: Arc<NetworkMonitor>,
        mut online_rx: watch::Receiver<bool>,
        poll: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let wakeup = reconciler.wakeup();
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Background loop received shutdown");
                    break;
                }

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        info!("Back online, draining queue");
                        reconciler.run_cycle().await;
                    }
                }

                _ = ticker.tick() => {
                    if network.is_online() {
                        reconciler.run_cycle().await;
                    }
                }

                _ = wakeup.notified() => {
                    if network.is_online() {
                        reconciler.run_cycle().await;
                    }
                }
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Ok(mut background) = self.background.lock() {
            if let Some(handle) = background.take() {
                handle.task.abort();
            }
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for assembling a [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn DurableStore>>,
    remote: Option<Arc<dyn RemoteApply>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    network: Option<Arc<NetworkMonitor>>,
}

impl SyncEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        SyncEngineBuilder {
            config,
            store: None,
            remote: None,
            emitter: None,
            network: None,
        }
    }

    /// Sets the durable store. Defaults to SQLite at the configured path.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the remote submission endpoint (required).
    pub fn with_remote(mut self, remote: Arc<dyn RemoteApply>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Shares an existing monitor instead of creating one from config.
    pub fn with_network(mut self, network: Arc<NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    /// Builds the engine, recovering any queue left by a previous run.
    pub async fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote required".into()))?;

        let store = match self.store {
            Some(store) => store,
            None => open_sqlite(&config).await?,
        };

        let queue = Arc::new(ActionQueue::open(store).await?);
        let events = Arc::new(EventBus::new(
            self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
        ));
        let policies = Arc::new(ConflictPolicies::new());
        let network = self.network.unwrap_or_else(|| {
            Arc::new(NetworkMonitor::new(
                config.network.start_online,
                config.debounce(),
            ))
        });

        let reconciler = Arc::new(Reconciler::new(
            queue.clone(),
            remote,
            policies.clone(),
            events.clone(),
            config.clone(),
        ));

        let diagnostics = DiagnosticsReporter::new(
            queue.clone(),
            reconciler.clone(),
            network.clone(),
            config.clone(),
        );

        let bus = events.clone();
        let connectivity = network.on_change(move |online| {
            bus.publish(SyncEvent::Connectivity { online });
        });

        info!(
            pending = queue.len().await,
            online = network.is_online(),
            "Sync engine built"
        );

        Ok(SyncEngine {
            config,
            queue,
            reconciler,
            policies,
            events,
            network,
            diagnostics,
            background: Mutex::new(None),
            _connectivity: connectivity,
        })
    }
}

async fn open_sqlite(config: &EngineConfig) -> SyncResult<Arc<dyn DurableStore>> {
    let path = config
        .database_path()
        .ok_or_else(|| SyncError::InvalidConfig("No database path and no store given".into()))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = SqliteStore::open(
        StoreConfig::new(path).max_connections(config.storage.max_connections),
    )
    .await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::UnreachableRemote;
    use reveille_store::MemoryStore;
    use serde_json::json;

    async fn engine() -> SyncEngine {
        SyncEngineBuilder::new(EngineConfig::default())
            .with_store(Arc::new(MemoryStore::new()))
            .with_remote(Arc::new(UnreachableRemote))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_remote() {
        let result = SyncEngineBuilder::new(EngineConfig::default())
            .with_store(Arc::new(MemoryStore::new()))
            .build()
            .await;
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_malformed_kind() {
        let engine = engine().await;
        let err = engine
            .enqueue_action("battle/create", OpType::Create, "b-1", json!({}))
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_sync_now_offline_is_skipped() {
        let engine = engine().await;
        engine
            .enqueue_action("battle", OpType::Create, "tmp-1", json!({}))
            .await
            .unwrap();

        let summary = engine.sync_now().await;
        assert!(summary.offline);
        assert_eq!(summary.submitted(), 0);
        assert_eq!(engine.get_pending_actions(None).await.unwrap().len(), 1);
    }

    #[derive(Serialize)]
    struct SleepSession {
        minutes: u32,
    }

    #[tokio::test]
    async fn test_enqueue_typed_payload() {
        let engine = engine().await;
        let action = engine
            .enqueue_typed("sleepSession", OpType::Create, "s-1", &SleepSession { minutes: 420 })
            .await
            .unwrap();
        assert_eq!(action.payload["minutes"], 420);

        let pending = engine.get_pending_actions(Some("sleepSession")).await.unwrap();
        assert_eq!(pending, vec![action]);
        assert!(engine.get_pending_actions(Some("battle")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let engine = engine().await;
        engine.start().unwrap();
        engine.start().unwrap();
        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
    }

    struct AcceptAll;

    #[async_trait::async_trait]
    impl RemoteApply for AcceptAll {
        async fn apply(&self, _action: &QueuedAction) -> Result<reveille_core::Outcome, crate::RemoteError> {
            Ok(reveille_core::Outcome::accepted())
        }
    }

    #[tokio::test]
    async fn test_sync_cursors_follow_acknowledged_actions() {
        let mut config = EngineConfig::default();
        config.network.start_online = true;
        let engine = SyncEngineBuilder::new(config)
            .with_store(Arc::new(MemoryStore::new()))
            .with_remote(Arc::new(AcceptAll))
            .build()
            .await
            .unwrap();

        assert!(engine.get_sync_cursors(None).await.unwrap().is_empty());

        let action = engine
            .enqueue_action("battle", OpType::Create, "b-1", json!({}))
            .await
            .unwrap();
        assert_eq!(engine.sync_now().await.succeeded, 1);

        let cursors = engine.get_sync_cursors(Some("battle")).await.unwrap();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].last_action_id, action.id);
        assert!(engine.get_sync_cursors(Some("sleepSession")).await.unwrap().is_empty());
        assert!(engine.get_sync_cursors(Some("bad/kind")).await.unwrap_err().is_contract_violation());
        assert_eq!(engine.get_sync_cursors(None).await.unwrap(), cursors);
    }
}
