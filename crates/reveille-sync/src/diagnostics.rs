//! # Diagnostics Reporter
//!
//! Read-only health view over the queue, reconciler and network monitor.
//!
//! ```text
//! ActionQueue::stats()       ──► pending / failed / syncing counts,
//!                                oldest pending, deferred writes,
//!                                storage failure streak
//! ActionQueue cursors        ──┐
//! ReconcilerStats            ──┴► last_synced_at (later of the two),
//!                                conflicts, permanent failures
//! NetworkMonitor::is_online  ──► is_online
//! DurableStore::health_check ──► storage_degraded (with the streak)
//! ```

use chrono::Utc;
use reveille_core::HealthSnapshot;
use std::sync::Arc;
use tracing::trace;

use crate::config::EngineConfig;
use crate::network::NetworkMonitor;
use crate::queue::ActionQueue;
use crate::reconciler::Reconciler;

/// Builds [`HealthSnapshot`]s on demand. Never mutates state.
pub struct DiagnosticsReporter {
    queue: Arc<ActionQueue>,
    reconciler: Arc<Reconciler>,
    network: Arc<NetworkMonitor>,
    config: Arc<EngineConfig>,
}

impl DiagnosticsReporter {
    pub fn new(
        queue: Arc<ActionQueue>,
        reconciler: Arc<Reconciler>,
        network: Arc<NetworkMonitor>,
        config: Arc<EngineConfig>,
    ) -> Self {
        DiagnosticsReporter {
            queue,
            reconciler,
            network,
            config,
        }
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let stats = self.queue.stats().await;
        let reconciler = self.reconciler.stats().await;
        let now = Utc::now();

        let last_synced_at = match (reconciler.last_synced_at, self.queue.last_synced_at().await) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let store_healthy = self.queue.store_healthy().await;
        let storage_degraded = !store_healthy
            || stats.storage_failure_streak >= self.config.diagnostics.degraded_after_failures;

        let snapshot = HealthSnapshot {
            pending_count: stats.pending,
            failed_count: stats.failed,
            syncing_count: stats.syncing,
            last_synced_at,
            oldest_pending_age_ms: stats
                .oldest_created_at
                .map(|oldest| (now - oldest).num_milliseconds().max(0)),
            permanent_failures: reconciler.permanent_failure_total,
            conflicts: reconciler.conflict_total,
            deferred_writes: stats.deferred_writes,
            is_online: self.network.is_online(),
            storage_degraded,
        };

        trace!(?snapshot, "Health snapshot");
        snapshot
    }
}
