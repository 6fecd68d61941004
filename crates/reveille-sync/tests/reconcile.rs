//! Drain-cycle behavior against a scripted remote.

mod common;

use common::{build, config, engine, FakeRemote, Reply};
use reveille_core::{OpType, Outcome, Resolution};
use reveille_store::{DurableStore, MemoryStore};
use reveille_sync::queue::{ActionQueue, INTERRUPTED_REASON};
use reveille_sync::{SpectatorFallback, SyncEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_same_entity_submitted_in_order() {
    let (engine, _store, remote) = engine(true).await;

    let create = engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
    let join = engine.enqueue_action("battle", OpType::Join, "b-1", json!({})).await.unwrap();
    let update = engine.enqueue_action("battle", OpType::Update, "b-1", json!({})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.succeeded, 3);

    let ids: Vec<_> = remote.calls().into_iter().map(|c| c.action_id).collect();
    assert_eq!(ids, vec![create.id, join.id, update.id]);
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_blocks_its_lane_until_retry() {
    let (engine, _store, remote) = engine(true).await;
    remote.then("b-1", Reply::Answer(Outcome::retryable("503")));

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Update, "b-1", json!({})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.failed, 1);
    assert_eq!(remote.calls().len(), 1);

    let health = engine.get_health_snapshot().await;
    assert_eq!(health.failed_count, 1);
    assert_eq!(health.pending_count, 1);

    // Still inside the backoff window: nothing moves.
    engine.sync_now().await;
    assert_eq!(remote.calls().len(), 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let summary = engine.sync_now().await;
    assert_eq!(summary.succeeded, 2);

    let ops: Vec<_> = remote.calls().into_iter().map(|c| c.op_type).collect();
    assert_eq!(ops, vec![OpType::Create, OpType::Create, OpType::Update]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() {
    let (engine, _store, remote) = engine(true).await;
    remote.always("b-1", Reply::Answer(Outcome::retryable("503")));
    let mut events = engine.subscribe();

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();

    for _ in 0..10 {
        engine.sync_now().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    assert_eq!(remote.calls().len(), engine.config().max_attempts() as usize);
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());

    let failures = engine.permanent_failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].last_error, "503");
    assert_eq!(engine.get_health_snapshot().await.permanent_failures, 1);

    let mut saw_failure_event = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SyncEvent::PermanentFailure { .. }) {
            saw_failure_event = true;
        }
    }
    assert!(saw_failure_event);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_entity_does_not_delay_others() {
    let (engine, _store, remote) = engine(true).await;
    remote.always("b-1", Reply::Answer(Outcome::retryable("busy")));

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Create, "b-2", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Update, "b-2", json!({})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(remote.calls_for("b-2").len(), 2);
    assert_eq!(remote.calls_for("b-1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_is_surfaced_once() {
    let (engine, _store, remote) = engine(true).await;
    remote.then("b-1", Reply::Answer(Outcome::conflict("battle already started")));
    let mut events = engine.subscribe();

    engine.enqueue_action("battle", OpType::Join, "b-1", json!({})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.conflicts, 1);
    engine.sync_now().await;

    let conflicts = engine.conflicts().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].resolution, Resolution::Dropped);
    assert_eq!(conflicts[0].reason, "battle already started");
    assert_eq!(remote.calls().len(), 1);
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());

    let mut conflict_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SyncEvent::Conflict { .. }) {
            conflict_events += 1;
        }
    }
    assert_eq!(conflict_events, 1);
}

#[tokio::test(start_paused = true)]
async fn test_spectator_merge_keeps_lane_order() {
    let (engine, _store, remote) = engine(true).await;
    engine
        .register_conflict_handler("battle", SpectatorFallback)
        .await
        .unwrap();
    remote.then("b-1", Reply::Answer(Outcome::conflict("battle full")));

    engine.enqueue_action("battle", OpType::Join, "b-1", json!({"user": "u-1"})).await.unwrap();
    engine.enqueue_action("battle", OpType::Update, "b-1", json!({"cheer": true})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.conflicts, 1);
    assert_eq!(summary.succeeded, 2);

    let calls = remote.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].op_type, OpType::Join);
    assert_eq!(calls[1].payload["role"], "spectator");
    assert_eq!(calls[1].payload["user"], "u-1");
    assert_eq!(calls[2].op_type, OpType::Update);

    assert_eq!(engine.conflicts().await[0].resolution, Resolution::Merged);
}

#[tokio::test(start_paused = true)]
async fn test_merged_action_that_conflicts_again_is_dropped() {
    let (engine, _store, remote) = engine(true).await;
    engine
        .register_conflict_handler("battle", SpectatorFallback)
        .await
        .unwrap();
    remote.always("b-1", Reply::Answer(Outcome::conflict("battle closed")));

    engine.enqueue_action("battle", OpType::Join, "b-1", json!({})).await.unwrap();
    engine.sync_now().await;

    let resolutions: Vec<_> = engine.conflicts().await.into_iter().map(|c| c.resolution).collect();
    assert_eq!(resolutions, vec![Resolution::Merged, Resolution::Dropped]);
    assert_eq!(remote.calls().len(), 2);
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_then_delete_collapses() {
    let (engine, _store, remote) = engine(true).await;

    engine.enqueue_action("battle", OpType::Create, "tmp-1", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Update, "tmp-1", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Delete, "tmp-1", json!({})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.collapsed, 3);
    assert_eq!(summary.submitted(), 0);
    assert!(remote.calls().is_empty());
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_canonical_id_rewrites_later_actions() {
    let (engine, _store, remote) = engine(true).await;
    remote.then("tmp-1", Reply::Answer(Outcome::accepted_as("srv-42")));

    engine.enqueue_action("battle", OpType::Create, "tmp-1", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Join, "tmp-1", json!({})).await.unwrap();

    engine.sync_now().await;

    let entities: Vec<_> = remote.calls().into_iter().map(|c| c.entity_id).collect();
    assert_eq!(entities, vec!["tmp-1", "srv-42"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_treated_as_retryable() {
    let mut config = config(true);
    config.reconciler.submit_timeout_ms = 1_000;
    let store = Arc::new(MemoryStore::new());
    let remote = FakeRemote::new();
    let engine = build(config, store, remote.clone()).await;
    remote.then("b-1", Reply::Hang);

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.failed, 1);

    let pending = engine.get_pending_actions(None).await.unwrap();
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.as_deref().unwrap_or_default().contains("timed out"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let summary = engine.sync_now().await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(remote.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_error_is_treated_as_retryable() {
    let (engine, _store, remote) = engine(true).await;
    remote.then(
        "b-1",
        Reply::Fail(reveille_sync::RemoteError::Network("connection reset".into())),
    );

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
    let summary = engine.sync_now().await;

    assert_eq!(summary.failed, 1);
    assert!(engine.conflicts().await.is_empty());
    assert_eq!(engine.get_health_snapshot().await.failed_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_ignores_late_response() {
    let (engine, _store, remote) = engine(true).await;
    let engine = Arc::new(engine);
    remote.then("b-1", Reply::Slow(Duration::from_secs(5), Outcome::accepted_as("srv-1")));

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Update, "b-1", json!({})).await.unwrap();

    let syncing = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sync_now().await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.clear_queue().await, 2);

    let summary = syncing.await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(remote.calls().len(), 1);
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());

    engine.enqueue_action("battle", OpType::Create, "b-2", json!({})).await.unwrap();
    assert_eq!(engine.sync_now().await.succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_replay_after_crash() {
    let store = Arc::new(MemoryStore::new());

    let (interrupted, acknowledged, waiting) = {
        let queue = ActionQueue::open(store.clone()).await.unwrap();
        let new = |id: &str| reveille_core::NewAction::new("battle", OpType::Create, id, json!({})).unwrap();

        let interrupted = queue.enqueue(new("b-1")).await.unwrap();
        let acknowledged = queue.enqueue(new("b-2")).await.unwrap();
        let waiting = queue.enqueue(new("b-3")).await.unwrap();

        queue.mark_syncing(&interrupted.id).await.unwrap();
        queue.mark_syncing(&acknowledged.id).await.unwrap();
        queue.mark_synced(&acknowledged.id).await.unwrap();
        (interrupted, acknowledged, waiting)
    };

    let remote = FakeRemote::new();
    let engine = build(config(true), store.clone(), remote.clone()).await;

    let pending = engine.get_pending_actions(None).await.unwrap();
    let resumed = pending.iter().find(|a| a.id == interrupted.id).unwrap();
    assert_eq!(resumed.attempts, 1);
    assert_eq!(resumed.last_error.as_deref(), Some(INTERRUPTED_REASON));

    engine.sync_now().await;

    let mut submitted: Vec<_> = remote.calls().into_iter().map(|c| c.action_id).collect();
    submitted.sort();
    let mut expected = vec![interrupted.id, waiting.id];
    expected.sort();
    assert_eq!(submitted, expected);
    assert!(!remote.calls().iter().any(|c| c.action_id == acknowledged.id));

    assert!(store.list_by_prefix("queue/").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_storage_outage_does_not_lose_actions() {
    let (engine, store, remote) = engine(true).await;
    store.set_available(false);

    let action = engine
        .enqueue_action("battle", OpType::Create, "b-1", json!({}))
        .await
        .unwrap();
    assert_eq!(engine.get_pending_actions(None).await.unwrap(), vec![action]);

    let health = engine.get_health_snapshot().await;
    assert!(health.storage_degraded);
    assert_eq!(health.deferred_writes, 1);

    // Nothing is submitted while queue state cannot be persisted.
    let summary = engine.sync_now().await;
    assert_eq!(summary.submitted(), 0);
    assert!(remote.calls().is_empty());

    store.set_available(true);
    assert_eq!(engine.sync_now().await.succeeded, 1);
    assert_eq!(remote.calls().len(), 1);

    let health = engine.get_health_snapshot().await;
    assert!(!health.storage_degraded);
    assert_eq!(health.deferred_writes, 0);
    assert!(store.list_by_prefix("queue/").await.unwrap().is_empty());
    assert!(store.get("cursor/battle").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unpersisted_syncing_mark_is_never_submitted() {
    let store = Arc::new(MemoryStore::new());
    let remote = FakeRemote::new();

    {
        let engine = build(config(true), store.clone(), remote.clone()).await;
        engine.enqueue_action("battle", OpType::Create, "tmp-1", json!({})).await.unwrap();

        store.set_available(false);
        let summary = engine.sync_now().await;
        assert_eq!(summary.submitted(), 0);

        let pending = engine.get_pending_actions(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].never_submitted());
    }
    assert!(remote.calls().is_empty());

    // Restart: the create was never sent, so a delete may still collapse it.
    store.set_available(true);
    let engine = build(config(true), store.clone(), remote.clone()).await;
    engine.enqueue_action("battle", OpType::Delete, "tmp-1", json!({})).await.unwrap();

    let summary = engine.sync_now().await;
    assert_eq!(summary.collapsed, 2);
    assert!(remote.calls().is_empty());
    assert!(store.list_by_prefix("queue/").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_syncing_mark_survives_restart_once_persisted() {
    let store = Arc::new(MemoryStore::new());
    let remote = FakeRemote::new();

    {
        let engine = build(config(true), store.clone(), remote.clone()).await;
        engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
        store.set_available(false);
        engine.sync_now().await;
        store.set_available(true);
        assert_eq!(engine.sync_now().await.succeeded, 1);
    }

    let engine = build(config(true), store.clone(), remote.clone()).await;
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());
    engine.sync_now().await;
    assert_eq!(remote.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_degraded_after_repeated_flush_failures() {
    let (engine, store, _remote) = engine(true).await;
    store.set_available(false);
    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();

    store.set_available(true);
    store.set_capacity(Some(0));
    for _ in 0..engine.config().diagnostics.degraded_after_failures {
        engine.sync_now().await;
    }

    let health = engine.get_health_snapshot().await;
    assert!(health.storage_degraded);
    assert!(health.deferred_writes > 0);
}
