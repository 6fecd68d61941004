//! End-to-end offline scenarios driven through the façade and the
//! background loop.

mod common;

use common::{engine, settle, Reply};
use reveille_core::{kinds, ActionStatus, OpType, Outcome};
use reveille_sync::SyncEvent;
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_offline_create_then_sync() {
    let (engine, _store, remote) = engine(false).await;
    engine.start().unwrap();

    let action = engine
        .enqueue_action("battle", OpType::Create, "tmp-7", json!({"name": "Dawn"}))
        .await
        .unwrap();
    assert_eq!(action.status, ActionStatus::Pending);

    settle().await;
    let pending = engine.get_pending_actions(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, ActionStatus::Pending);
    assert!(remote.calls().is_empty());

    engine.network().report(true);
    settle().await;

    assert_eq!(remote.calls().len(), 1);
    assert_eq!(remote.calls()[0].action_id, action.id);
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());

    let health = engine.get_health_snapshot().await;
    assert!(health.is_online);
    assert_eq!(health.pending_count, 0);
    assert!(health.last_synced_at.is_some());

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_entities_both_submitted() {
    let (engine, _store, remote) = engine(false).await;
    engine.start().unwrap();

    let track: OpType = "track".parse().unwrap();
    engine.enqueue_action(kinds::BATTLE, OpType::Create, "x", json!({})).await.unwrap();
    engine.enqueue_action(kinds::ANALYTICS_EVENT, track, "y", json!({"event": "opened"})).await.unwrap();

    engine.network().report(true);
    settle().await;

    let mut entities: Vec<_> = remote.calls().into_iter().map(|c| c.entity_id).collect();
    entities.sort();
    assert_eq!(entities, vec!["x", "y"]);
    assert_eq!(engine.get_health_snapshot().await.pending_count, 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flapping_network_reconnects_once() {
    let (engine, _store, remote) = engine(false).await;
    let mut events = engine.subscribe();
    engine.start().unwrap();

    engine.enqueue_action(kinds::SLEEP_SESSION, OpType::Create, "s-1", json!({})).await.unwrap();

    let network = engine.network();
    for online in [true, false, true, false, true] {
        network.report(online);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    settle().await;

    assert_eq!(remote.calls().len(), 1);

    let mut connectivity = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::Connectivity { online } = event {
            connectivity.push(online);
        }
    }
    assert_eq!(connectivity, vec![true]);

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_while_online_drains_in_background() {
    let (engine, _store, remote) = engine(true).await;
    engine.start().unwrap();
    settle().await;

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
    settle().await;

    assert_eq!(remote.calls().len(), 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backoff_expiry_resumes_lane_in_background() {
    let (engine, _store, remote) = engine(true).await;
    remote.then("b-1", Reply::Answer(Outcome::retryable("busy")));
    engine.start().unwrap();

    engine.enqueue_action("battle", OpType::Create, "b-1", json!({})).await.unwrap();
    engine.enqueue_action("battle", OpType::Update, "b-1", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(remote.calls().len(), 1);

    // Poll interval is 30s; only the backoff timer can wake the loop here.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(remote.calls().len(), 3);
    assert!(engine.get_pending_actions(None).await.unwrap().is_empty());

    engine.shutdown().await.unwrap();
}
