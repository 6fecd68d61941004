//! In-memory Durable Store.
//!
//! Used by tests and by hosts without a writable disk. Two switches let
//! tests simulate substrate trouble:
//!
//! - [`MemoryStore::set_available`] makes every operation fail with
//!   `StoreError::Unavailable`
//! - [`MemoryStore::set_capacity`] makes writes of new keys fail with
//!   `StoreError::QuotaExceeded` once the entry count reaches the limit

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::backend::{DurableStore, StoreEntry};
use crate::error::{StoreError, StoreResult};

const UNLIMITED: usize = usize::MAX;

/// `BTreeMap`-backed store; iteration order is key order.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    available: AtomicBool,
    capacity: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            entries: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            capacity: AtomicUsize::new(UNLIMITED),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Limits the number of entries; `None` removes the limit.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        self.capacity
            .store(capacity.unwrap_or(UNLIMITED), Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.write().await;

        let capacity = self.capacity.load(Ordering::SeqCst);
        if !entries.contains_key(key) && entries.len() >= capacity {
            return Err(StoreError::QuotaExceeded(format!(
                "memory store holds {} entries",
                capacity
            )));
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<StoreEntry>> {
        self.check_available()?;
        let entries = self.entries.read().await;

        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| StoreEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        self.check_available()?;
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn health_check(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
