//! # Sync Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Contract      │  │     Storage             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  InvalidAction  │  │  Storage (StoreError)   │ │
//! │  │  ConfigLoad     │  │  InvalidTrans.  │  │  CorruptRecord          │ │
//! │  │  ConfigSave     │  │  ActionNotFound │  │  SerializationFailed    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Remote       │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Remote         │  │  Internal       │                              │
//! │  │  (RemoteError)  │  │                 │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## What Crosses the Façade
//! Offline periods, conflicts and retryable rejections are data
//! (`HealthSnapshot`, `ConflictRecord`, `SyncEvent`), never errors. The
//! façade only returns `SyncError::InvalidAction` for contract violations;
//! every other variant stays inside the engine.

use reveille_core::{CoreError, ValidationError};
use reveille_store::StoreError;
use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Contract Errors
    // =========================================================================
    /// The caller handed the engine an action it cannot key or order.
    ///
    /// ## When This Occurs
    /// - Empty or malformed entity kind (`"battle/create"`, `""`)
    /// - Entity id containing `/` or control characters
    #[error("Invalid action: {0}")]
    InvalidAction(#[from] ValidationError),

    /// A status transition the action state machine does not allow.
    #[error("Invalid transition for action {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// No queued action with this id.
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Durable store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// A persisted record could not be interpreted.
    #[error("Corrupt record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Failed to serialize a record.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The remote collaborator could not be reached.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::InvalidAction(v),
            other => SyncError::CorruptRecord {
                key: "unknown".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried on a later tick.
    ///
    /// ## Retryable Errors
    /// - Transient storage failures (locked, quota exceeded)
    /// - Remote failures (network, timeout)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Contract violations
    /// - Corrupt records
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Storage(e) => e.is_transient(),
            SyncError::Remote(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the durable store is temporarily unusable.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, SyncError::Storage(e) if e.is_transient())
    }

    /// Returns true if the caller violated the façade contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidAction(_)
                | SyncError::InvalidTransition { .. }
                | SyncError::ActionNotFound(_)
        )
    }
}
