//! Scripted remote and engine helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use reveille_core::{OpType, Outcome, QueuedAction};
use reveille_store::MemoryStore;
use reveille_sync::{EngineConfig, RemoteApply, RemoteError, SyncEngine, SyncEngineBuilder};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake answers for one submission.
#[derive(Debug, Clone)]
pub enum Reply {
    Answer(Outcome),
    Fail(RemoteError),
    /// Answer after a delay.
    Slow(Duration, Outcome),
    /// Never answer.
    Hang,
}

/// One recorded `apply` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub action_id: String,
    pub entity_id: String,
    pub op_type: OpType,
    pub payload: Value,
}

/// Remote that records submissions and replays scripted replies per entity.
/// Unscripted submissions are accepted.
#[derive(Default)]
pub struct FakeRemote {
    calls: Mutex<Vec<Call>>,
    once: Mutex<HashMap<String, VecDeque<Reply>>>,
    always: Mutex<HashMap<String, Reply>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a reply for the next submission on `entity_id`.
    pub fn then(&self, entity_id: &str, reply: Reply) {
        self.once
            .lock()
            .unwrap()
            .entry(entity_id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Replies the same way to every submission on `entity_id`.
    pub fn always(&self, entity_id: &str, reply: Reply) {
        self.always
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, entity_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.entity_id == entity_id)
            .collect()
    }

    fn next_reply(&self, entity_id: &str) -> Reply {
        if let Some(reply) = self
            .once
            .lock()
            .unwrap()
            .get_mut(entity_id)
            .and_then(|q| q.pop_front())
        {
            return reply;
        }
        self.always
            .lock()
            .unwrap()
            .get(entity_id)
            .cloned()
            .unwrap_or(Reply::Answer(Outcome::accepted()))
    }
}

#[async_trait]
impl RemoteApply for FakeRemote {
    async fn apply(&self, action: &QueuedAction) -> Result<Outcome, RemoteError> {
        self.calls.lock().unwrap().push(Call {
            action_id: action.id.clone(),
            entity_id: action.entity_id.to_string(),
            op_type: action.op_type,
            payload: action.payload.clone(),
        });

        match self.next_reply(action.entity_id.as_str()) {
            Reply::Answer(outcome) => Ok(outcome),
            Reply::Fail(error) => Err(error),
            Reply::Slow(delay, outcome) => {
                tokio::time::sleep(delay).await;
                Ok(outcome)
            }
            Reply::Hang => std::future::pending().await,
        }
    }
}

pub fn config(online: bool) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.network.start_online = online;
    config
}

pub async fn build(config: EngineConfig, store: Arc<MemoryStore>, remote: Arc<FakeRemote>) -> SyncEngine {
    SyncEngineBuilder::new(config)
        .with_store(store)
        .with_remote(remote)
        .build()
        .await
        .unwrap()
}

pub async fn engine(online: bool) -> (SyncEngine, Arc<MemoryStore>, Arc<FakeRemote>) {
    let store = Arc::new(MemoryStore::new());
    let remote = FakeRemote::new();
    let engine = build(config(online), store.clone(), remote.clone()).await;
    (engine, store, remote)
}

/// Long enough for the network debounce to settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}
