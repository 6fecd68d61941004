//! # Durable Store Contract
//!
//! The key-value seam every persistence adapter implements.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DurableStore                                     │
//! │                                                                         │
//! │   ActionQueue ──► put / get / delete / list_by_prefix / delete_prefix   │
//! │                          │                                              │
//! │            ┌─────────────┴──────────────┐                               │
//! │            ▼                            ▼                               │
//! │   ┌─────────────────┐          ┌─────────────────┐                      │
//! │   │   SqliteStore   │          │   MemoryStore   │                      │
//! │   │  kv_entries     │          │  BTreeMap +     │                      │
//! │   │  (WAL, pooled)  │          │  fault switches │                      │
//! │   └─────────────────┘          └─────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::error::StoreResult;

/// One persisted key-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub value: String,
}

/// A local key-value store that survives process restarts.
///
/// # Invariants
///
/// - Writes are atomic per key; there are no cross-key transactions
/// - `list_by_prefix` returns entries in lexicographic key order
/// - Transient substrate trouble is reported as a transient
///   [`StoreError`](crate::StoreError), never as a panic
/// - Implementations must be `Send + Sync`; the engine shares one store
///   across tasks
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Inserts or replaces the value at `key`.
    async fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Reads the value at `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Returns every entry whose key starts with `prefix`, sorted by key.
    async fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<StoreEntry>>;

    /// Removes every entry whose key starts with `prefix`. Returns the count.
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Returns true if the store can currently serve requests.
    async fn health_check(&self) -> bool;
}

/// Smallest string greater than every string starting with `prefix`.
///
/// Returns `None` when no such bound exists (empty prefix), meaning the scan
/// is unbounded above.
pub(crate) fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        // Code points D800..DFFF are not chars; step over them.
        let next = match last {
            '\u{D7FF}' => Some('\u{E000}'),
            c => char::from_u32(c as u32 + 1),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
