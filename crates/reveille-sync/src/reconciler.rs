//! # Sync Reconciler
//!
//! Drains the action queue against the remote system.
//!
//! ## Drain Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         run_cycle()                                     │
//! │                                                                         │
//! │  0. flush deferred writes (stop if the store refuses), requeue failed   │
//! │     actions whose backoff ended                                         │
//! │                                                                         │
//! │  1. kinds_with_work()  ──►  battle        sleepSession     ...         │
//! │                             (guarded)     (guarded)                     │
//! │                                │                                        │
//! │  2. lanes by entity_id         ▼                                        │
//! │     ┌──────────────────────────────────────────────────────────────┐   │
//! │     │ b-1: create ─► join ─► update        (sequential)            │   │
//! │     │ b-2: create                          (concurrent with b-1)   │   │
//! │     │ b-3: create ─► delete                (collapsed, no submit)  │   │
//! │     └──────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  3. per action                 ▼                                        │
//! │     mark_syncing ─► timeout(remote.apply) ─► Outcome                   │
//! │                                                                         │
//! │        Accepted            ─► synced, cursor, purge, id rewrite        │
//! │        Rejected(retryable) ─► failed, backoff timer, lane blocked      │
//! │        Rejected(conflict)  ─► ConflictHandler: drop | retry | merge    │
//! │        RemoteError         ─► same as retryable, network_failures += 1 │
//! │                                                                         │
//! │  4. attempts == max_attempts ─► PermanentFailure, lane continues       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Generations
//! `clear()` bumps a generation counter. Every submission remembers the
//! generation it started in; a response arriving after the counter moved
//! is discarded and the lane stops.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use reveille_core::{
    ConflictRecord, EntityId, EntityKind, OpType, Outcome, PermanentFailure, QueuedAction,
    Resolution, ServerState, SyncSummary,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::conflict::{ConflictPolicies, ConflictResolution};
use crate::events::{EventBus, SyncEvent};
use crate::queue::ActionQueue;
use crate::remote::{RemoteApply, RemoteError};

/// Conflict and failure records kept for the façade.
const RECENT_RECORDS: usize = 100;

/// `last_error` recorded when an action is given up before submission.
const ATTEMPTS_EXHAUSTED: &str = "maximum attempts reached";

// =============================================================================
// Statistics
// =============================================================================

/// Counters and recent records kept across drain cycles.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerStats {
    /// Last time any action was accepted.
    pub last_synced_at: Option<DateTime<Utc>>,

    /// Submissions that never got an answer (transport error or timeout).
    pub network_failures: u64,

    /// Most recent conflicts, oldest first.
    pub conflicts: Vec<ConflictRecord>,
    pub conflict_total: usize,

    /// Most recent permanent failures, oldest first.
    pub permanent_failures: Vec<PermanentFailure>,
    pub permanent_failure_total: usize,
}

fn push_bounded<T>(records: &mut Vec<T>, record: T) {
    if records.len() == RECENT_RECORDS {
        records.remove(0);
    }
    records.push(record);
}

// =============================================================================
// Kind Guard
// =============================================================================

type KindSet = Mutex<HashSet<EntityKind>>;
type TimerMap = Mutex<HashMap<String, AbortHandle>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks one entity kind as being drained; released on drop.
struct KindGuard {
    kind: EntityKind,
    in_flight: Arc<KindSet>,
}

impl KindGuard {
    fn try_acquire(in_flight: &Arc<KindSet>, kind: &EntityKind) -> Option<Self> {
        if !lock(in_flight).insert(kind.clone()) {
            return None;
        }
        Some(KindGuard {
            kind: kind.clone(),
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for KindGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.kind);
    }
}

// =============================================================================
// Pure Helpers
// =============================================================================

/// Delay before the retry that follows `attempts` failed submissions:
/// `base × 2^(attempts-1)`, capped at the configured maximum.
pub fn retry_delay(config: &EngineConfig, attempts: u32) -> Duration {
    let mut backoff = ExponentialBackoff {
        current_interval: config.base_delay(),
        initial_interval: config.base_delay(),
        randomization_factor: config.backoff.jitter,
        multiplier: 2.0,
        max_interval: config.max_delay(),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut delay = config.base_delay();
    for _ in 0..attempts.max(1) {
        if let Some(next) = backoff.next_backoff() {
            delay = next;
        }
    }
    delay.min(config.max_delay())
}

/// Length of the collapsible run at the head of a lane, if any.
///
/// The run starts with a never-submitted `create` and ends at the first
/// `delete`; every action in between must also be unsubmitted.
pub fn collapsible_prefix(lane: &[QueuedAction]) -> Option<usize> {
    let untouched = |a: &QueuedAction| a.is_ready() && a.never_submitted();

    let head = lane.first()?;
    if head.op_type != OpType::Create || !untouched(head) {
        return None;
    }

    for (index, action) in lane.iter().enumerate().skip(1) {
        if !untouched(action) {
            return None;
        }
        if action.op_type == OpType::Delete {
            return Some(index + 1);
        }
    }
    None
}

fn group_lanes(actions: Vec<QueuedAction>) -> Vec<Vec<QueuedAction>> {
    let mut lanes: BTreeMap<EntityId, Vec<QueuedAction>> = BTreeMap::new();
    for action in actions {
        lanes.entry(action.entity_id.clone()).or_default().push(action);
    }
    lanes.into_values().collect()
}

/// What a lane does after one submission.
enum LaneStep {
    Next,
    Resubmit(String),
    Blocked,
    Stale,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Submits queued actions and applies the retry and conflict policy.
pub struct Reconciler {
    queue: Arc<ActionQueue>,
    remote: Arc<dyn RemoteApply>,
    policies: Arc<ConflictPolicies>,
    events: Arc<EventBus>,
    config: Arc<EngineConfig>,
    in_flight: Arc<KindSet>,
    generation: Arc<AtomicU64>,
    timers: Arc<TimerMap>,
    stats: RwLock<ReconcilerStats>,
    wakeup: Arc<Notify>,
}

impl Reconciler {
    pub fn new(
        queue: Arc<ActionQueue>,
        remote: Arc<dyn RemoteApply>,
        policies: Arc<ConflictPolicies>,
        events: Arc<EventBus>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Reconciler {
            queue,
            remote,
            policies,
            events,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            generation: Arc::new(AtomicU64::new(0)),
            timers: Arc::new(Mutex::new(HashMap::new())),
            stats: RwLock::new(ReconcilerStats::default()),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Notified whenever a backoff timer requeues an action.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation() != generation
    }

    pub async fn stats(&self) -> ReconcilerStats {
        self.stats.read().await.clone()
    }

    /// Backoff timers currently armed.
    pub fn armed_timers(&self) -> usize {
        lock(&self.timers).len()
    }

    // =========================================================================
    // Drain Cycle
    // =========================================================================

    /// Runs one full drain cycle over every kind with pending work.
    pub async fn run_cycle(&self) -> SyncSummary {
        let generation = self.generation();

        if let Err(e) = self.queue.flush_deferred().await {
            warn!(error = %e, "Store still unavailable, deferred writes kept, drain skipped");
            let summary = SyncSummary::default();
            self.events.publish(SyncEvent::completed(&summary));
            return summary;
        }

        match self.queue.requeue_due(Utc::now()).await {
            Ok(requeued) => {
                for id in &requeued {
                    self.cancel_timer(id);
                }
                if !requeued.is_empty() {
                    debug!(count = requeued.len(), "Requeued actions past their backoff");
                }
            }
            Err(e) => warn!(error = %e, "Failed to requeue due actions"),
        }

        let kinds = self.queue.kinds_with_work().await;
        let results = join_all(kinds.iter().map(|kind| self.drain_guarded(kind, generation))).await;

        let mut summary = SyncSummary::default();
        for result in results {
            summary.absorb(result);
        }

        if summary.submitted() > 0 || summary.collapsed > 0 || summary.permanent_failures > 0 {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                conflicts = summary.conflicts,
                permanent_failures = summary.permanent_failures,
                collapsed = summary.collapsed,
                "Drain cycle complete"
            );
        }

        self.events.publish(SyncEvent::completed(&summary));
        summary
    }

    async fn drain_guarded(&self, kind: &EntityKind, generation: u64) -> SyncSummary {
        let Some(_guard) = KindGuard::try_acquire(&self.in_flight, kind) else {
            debug!(entity_kind = %kind, "Drain already in flight, skipping kind");
            return SyncSummary {
                skipped_kinds: 1,
                ..Default::default()
            };
        };

        let lanes = group_lanes(self.queue.drain(Some(kind)).await);
        let width = self.config.reconciler.max_concurrent_lanes.max(1);

        let results: Vec<SyncSummary> = stream::iter(lanes)
            .map(|lane| self.run_lane(lane, generation))
            .buffer_unordered(width)
            .collect()
            .await;

        let mut summary = SyncSummary::default();
        for result in results {
            summary.absorb(result);
        }
        summary
    }

    async fn run_lane(&self, mut lane: Vec<QueuedAction>, generation: u64) -> SyncSummary {
        let mut summary = SyncSummary::default();

        while let Some(len) = collapsible_prefix(&lane) {
            for action in lane.drain(..len) {
                self.cancel_timer(&action.id);
                if let Err(e) = self.queue.purge(&action.id).await {
                    warn!(action_id = %action.id, error = %e, "Failed to purge collapsed action");
                }
                summary.collapsed += 1;
            }
            debug!(collapsed = summary.collapsed, "Collapsed create/delete run without submitting");
        }

        let mut ids: VecDeque<String> = lane.into_iter().map(|a| a.id).collect();

        while let Some(id) = ids.pop_front() {
            if self.is_stale(generation) {
                break;
            }

            // Re-read: a timer, merge or purge may have touched it.
            let Some(action) = self.queue.get(&id).await else {
                continue;
            };
            if !action.is_ready() {
                break;
            }

            if action.attempts >= self.config.max_attempts() {
                let reason = action
                    .last_error
                    .clone()
                    .unwrap_or_else(|| ATTEMPTS_EXHAUSTED.to_string());
                self.give_up(action, reason).await;
                summary.permanent_failures += 1;
                continue;
            }

            match self.submit(action, generation, &mut summary).await {
                LaneStep::Next => continue,
                LaneStep::Resubmit(next) => ids.push_front(next),
                LaneStep::Blocked | LaneStep::Stale => break,
            }
        }

        summary
    }

    // =========================================================================
    // Submission
    // =========================================================================

    async fn submit(&self, action: QueuedAction, generation: u64, summary: &mut SyncSummary) -> LaneStep {
        // Nothing is submitted unless `syncing` is durable.
        let action = match self.queue.mark_syncing(&action.id).await {
            Ok(action) => action,
            Err(e) => {
                warn!(action_id = %action.id, error = %e, "Could not persist syncing mark, lane deferred");
                return LaneStep::Blocked;
            }
        };

        debug!(
            action_id = %action.id,
            entity_kind = %action.entity_kind,
            entity_id = %action.entity_id,
            op = %action.op_type,
            attempt = action.attempts + 1,
            "Submitting action"
        );

        let limit = self.config.submit_timeout();
        let result = match tokio::time::timeout(limit, self.remote.apply(&action)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(limit.as_millis() as u64)),
        };

        if self.is_stale(generation) {
            debug!(action_id = %action.id, "Ignoring response from before queue clear");
            return LaneStep::Stale;
        }

        match result {
            Ok(Outcome::Accepted(state)) => self.on_accepted(action, state, summary).await,
            Ok(Outcome::Rejected {
                reason,
                retryable: true,
            }) => self.on_retryable(action, reason, generation, summary).await,
            Ok(Outcome::Rejected {
                reason,
                retryable: false,
            }) => self.on_conflict(action, reason, generation, summary).await,
            Err(e) => {
                self.stats.write().await.network_failures += 1;
                self.on_retryable(action, e.to_string(), generation, summary)
                    .await
            }
        }
    }

    async fn on_accepted(&self, action: QueuedAction, state: ServerState, summary: &mut SyncSummary) -> LaneStep {
        if let Err(e) = self.queue.mark_synced(&action.id).await {
            warn!(action_id = %action.id, error = %e, "Could not mark action synced");
            return LaneStep::Blocked;
        }
        if let Err(e) = self.queue.advance_cursor(&action).await {
            warn!(entity_kind = %action.entity_kind, error = %e, "Could not advance cursor");
        }
        if let Err(e) = self.queue.purge(&action.id).await {
            warn!(action_id = %action.id, error = %e, "Could not purge synced action");
        }

        if let Some(canonical) = state
            .canonical_entity_id
            .filter(|id| id != action.entity_id.as_str())
        {
            match EntityId::new(canonical) {
                Ok(canonical) => {
                    if let Err(e) = self
                        .queue
                        .rewrite_entity_id(&action.entity_kind, &action.entity_id, &canonical)
                        .await
                    {
                        warn!(error = %e, "Could not rewrite entity id");
                    }
                }
                Err(e) => warn!(action_id = %action.id, error = %e, "Server returned unusable entity id"),
            }
        }

        self.stats.write().await.last_synced_at = Some(Utc::now());
        summary.succeeded += 1;

        debug!(action_id = %action.id, entity_id = %action.entity_id, "Action synced");
        LaneStep::Next
    }

    async fn on_retryable(
        &self,
        action: QueuedAction,
        reason: String,
        generation: u64,
        summary: &mut SyncSummary,
    ) -> LaneStep {
        let delay = retry_delay(&self.config, action.attempts + 1);
        let next_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        let failed = match self.queue.mark_failed(&action.id, &reason, Some(next_at)).await {
            Ok(failed) => failed,
            Err(e) => {
                warn!(action_id = %action.id, error = %e, "Could not mark action failed");
                return LaneStep::Blocked;
            }
        };

        if failed.attempts >= self.config.max_attempts() {
            self.give_up(failed, reason).await;
            summary.permanent_failures += 1;
            return LaneStep::Next;
        }

        warn!(
            action_id = %failed.id,
            entity_id = %failed.entity_id,
            attempts = failed.attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Submission failed, retrying after backoff"
        );

        summary.failed += 1;
        self.schedule_retry(&failed.id, delay, generation);
        LaneStep::Blocked
    }

    async fn on_conflict(
        &self,
        action: QueuedAction,
        reason: String,
        generation: u64,
        summary: &mut SyncSummary,
    ) -> LaneStep {
        let resolution = if action.merged_from.is_some() {
            ConflictResolution::Drop
        } else {
            self.policies
                .handler_for(&action.entity_kind)
                .await
                .resolve(&action, &reason)
        };

        summary.conflicts += 1;
        warn!(
            action_id = %action.id,
            entity_kind = %action.entity_kind,
            entity_id = %action.entity_id,
            reason = %reason,
            resolution = ?resolution,
            "Conflict"
        );

        match resolution {
            ConflictResolution::Drop => {
                if let Err(e) = self.queue.purge(&action.id).await {
                    warn!(action_id = %action.id, error = %e, "Could not purge conflicting action");
                }
                self.record_conflict(action, reason, Resolution::Dropped).await;
                LaneStep::Next
            }
            ConflictResolution::Retry => {
                self.record_conflict(action.clone(), reason.clone(), Resolution::Retried)
                    .await;
                self.on_retryable(action, reason, generation, summary).await
            }
            ConflictResolution::Merge { op_type, payload } => {
                match self.queue.replace(&action.id, op_type, payload).await {
                    Ok(merged) => {
                        self.record_conflict(action, reason, Resolution::Merged).await;
                        LaneStep::Resubmit(merged.id)
                    }
                    Err(e) => {
                        warn!(action_id = %action.id, error = %e, "Could not merge conflicting action");
                        LaneStep::Blocked
                    }
                }
            }
        }
    }

    async fn record_conflict(&self, action: QueuedAction, reason: String, resolution: Resolution) {
        let record = ConflictRecord {
            action,
            reason,
            resolution,
            recorded_at: Utc::now(),
        };

        {
            let mut stats = self.stats.write().await;
            push_bounded(&mut stats.conflicts, record.clone());
            stats.conflict_total += 1;
        }

        self.events.publish(SyncEvent::Conflict { record });
    }

    async fn give_up(&self, action: QueuedAction, last_error: String) {
        self.cancel_timer(&action.id);
        if let Err(e) = self.queue.purge(&action.id).await {
            warn!(action_id = %action.id, error = %e, "Could not purge exhausted action");
        }

        error!(
            action_id = %action.id,
            entity_kind = %action.entity_kind,
            entity_id = %action.entity_id,
            attempts = action.attempts,
            last_error = %last_error,
            "Action permanently failed"
        );

        let failure = PermanentFailure {
            action,
            last_error,
            failed_at: Utc::now(),
        };

        {
            let mut stats = self.stats.write().await;
            push_bounded(&mut stats.permanent_failures, failure.clone());
            stats.permanent_failure_total += 1;
        }

        self.events.publish(SyncEvent::PermanentFailure { failure });
    }

    // =========================================================================
    // Backoff Timers
    // =========================================================================

    fn schedule_retry(&self, id: &str, delay: Duration, generation: u64) {
        let queue = self.queue.clone();
        let timers = self.timers.clone();
        let current = self.generation.clone();
        let wakeup = self.wakeup.clone();
        let action_id = id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&timers).remove(&action_id);

            if current.load(Ordering::SeqCst) != generation {
                return;
            }

            match queue.requeue(&action_id).await {
                Ok(_) => {
                    debug!(action_id = %action_id, "Backoff elapsed, action requeued");
                    wakeup.notify_one();
                }
                Err(e) => debug!(action_id = %action_id, error = %e, "Backoff timer found nothing to requeue"),
            }
        });

        if let Some(previous) = lock(&self.timers).insert(id.to_string(), task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel_timer(&self, id: &str) {
        if let Some(handle) = lock(&self.timers).remove(id) {
            handle.abort();
        }
    }

    fn cancel_all(&self) {
        for (_, handle) in lock(&self.timers).drain() {
            handle.abort();
        }
    }

    /// Forgets everything: bumps the generation, stops timers and empties
    /// the queue. Responses still in flight are discarded when they land.
    pub async fn clear(&self) -> usize {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_all();
        let removed = self.queue.clear().await;
        *self.stats.write().await = ReconcilerStats::default();

        info!(generation, removed, "Reconciler state cleared");
        removed
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
