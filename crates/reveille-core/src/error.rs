//! # Error Types
//!
//! Domain-specific error types for reveille-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  reveille-core errors (this file)                                      │
//! │  ├── CoreError        - Malformed records, bad status strings          │
//! │  └── ValidationError  - Caller contract violations                     │
//! │                                                                         │
//! │  reveille-store errors (separate crate)                                │
//! │  └── StoreError       - Durable Store failures                         │
//! │                                                                         │
//! │  reveille-sync errors (separate crate)                                 │
//! │  └── SyncError        - Engine failures (wraps the two above)          │
//! │                                                                         │
//! │  Flow: ValidationError → SyncError::InvalidAction → façade caller      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only contract violations ever cross the façade as errors. Offline
//! periods, conflicts and transient failures are reported as data.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while interpreting persisted or wire data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored key does not follow the queue key layout.
    ///
    /// ## When This Occurs
    /// - A foreign writer put an entry under the `queue/` namespace
    /// - A key was truncated by the storage substrate
    #[error("Malformed store key: {0}")]
    MalformedKey(String),

    /// Unknown operation type string.
    #[error("Unknown operation type: '{0}'")]
    UnknownOpType(String),

    /// Unknown action status string.
    #[error("Unknown action status: '{0}'")]
    UnknownStatus(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are the "programming-contract violations" of the façade: the caller
/// handed the engine something it can never key or order.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., entity kind with a slash in it).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "entity_kind".to_string(),
        };
        assert_eq!(err.to_string(), "entity_kind is required");

        let err = ValidationError::TooLong {
            field: "entity_id".to_string(),
            max: 128,
        };
        assert_eq!(err.to_string(), "entity_id must be at most 128 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "entity_kind".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
