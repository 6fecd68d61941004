//! # Remote Submission Contract
//!
//! The only place the engine talks to the network.
//!
//! ```text
//! ┌────────────────┐   apply(&QueuedAction)   ┌──────────────────────────┐
//! │   Reconciler   │ ───────────────────────► │  RemoteApply (injected)  │
//! │                │ ◄─────────────────────── │  HTTP client, gRPC, fake │
//! └────────────────┘   Ok(Outcome)            └──────────────────────────┘
//!                      Err(RemoteError)
//! ```
//!
//! `Ok(Outcome::Rejected { .. })` is an answer from the server.
//! `Err(RemoteError)` means no answer arrived; the reconciler treats it like
//! a retryable rejection and only counts it separately for diagnostics.
//!
//! Implementations should send `action.id` as an idempotency key so that a
//! submission repeated after a crash is applied at most once.

use async_trait::async_trait;
use reveille_core::{Outcome, QueuedAction};
use thiserror::Error;

/// Failure to obtain an answer from the remote system.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport-level failure (DNS, refused connection, reset, ...).
    #[error("Network failure: {0}")]
    Network(String),

    /// No response within the submission timeout.
    #[error("Submission timed out after {0} ms")]
    Timeout(u64),
}

/// Applies one queued action to the remote system.
#[async_trait]
pub trait RemoteApply: Send + Sync {
    async fn apply(&self, action: &QueuedAction) -> Result<Outcome, RemoteError>;
}

/// Remote that is never reachable.
///
/// For hosts that only inspect a queue (diagnostics tooling) and never drain
/// it.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnreachableRemote;

#[async_trait]
impl RemoteApply for UnreachableRemote {
    async fn apply(&self, _action: &QueuedAction) -> Result<Outcome, RemoteError> {
        Err(RemoteError::Network("no remote configured".to_string()))
    }
}
