//! # Validation Module
//!
//! Input validation for everything the engine uses to key and order actions.
//!
//! ## Why Only Keys?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      What Gets Validated                                │
//! │                                                                         │
//! │  entity_kind ──► becomes a store key segment   queue/{kind}/...        │
//! │                  must be non-empty, no '/', starts with a letter        │
//! │                                                                         │
//! │  entity_id   ──► groups actions into lanes                              │
//! │                  must be non-empty, no '/', no control chars            │
//! │                                                                         │
//! │  payload     ──► NOT validated: owned by the domain, opaque here        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use reveille_core::validation::{validate_entity_id, validate_entity_kind};
//!
//! validate_entity_kind("battle").unwrap();
//! validate_entity_id("tmp-42").unwrap();
//! assert!(validate_entity_kind("battle/create").is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_ENTITY_ID_LEN, MAX_ENTITY_KIND_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates an entity kind tag.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Starts with an ASCII letter
/// - Only ASCII letters, digits, `-` and `_`
///
/// ## Example
/// ```rust
/// use reveille_core::validation::validate_entity_kind;
///
/// assert!(validate_entity_kind("analyticsEvent").is_ok());
/// assert!(validate_entity_kind("").is_err());
/// assert!(validate_entity_kind("9lives").is_err());
/// ```
pub fn validate_entity_kind(kind: &str) -> ValidationResult<()> {
    if kind.is_empty() {
        return Err(ValidationError::Required {
            field: "entity_kind".to_string(),
        });
    }

    if kind.len() > MAX_ENTITY_KIND_LEN {
        return Err(ValidationError::TooLong {
            field: "entity_kind".to_string(),
            max: MAX_ENTITY_KIND_LEN,
        });
    }

    if !kind.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidFormat {
            field: "entity_kind".to_string(),
            reason: "must start with a letter".to_string(),
        });
    }

    if !kind
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "entity_kind".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates an entity id (temporary or canonical).
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most 128 characters
/// - No `/` and no control characters
pub fn validate_entity_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "entity_id".to_string(),
        });
    }

    if id.len() > MAX_ENTITY_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "entity_id".to_string(),
            max: MAX_ENTITY_ID_LEN,
        });
    }

    if id.chars().any(|c| c == '/' || c.is_control()) {
        return Err(ValidationError::InvalidFormat {
            field: "entity_id".to_string(),
            reason: "must not contain '/' or control characters".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_valid() {
        assert!(validate_entity_kind("battle").is_ok());
        assert!(validate_entity_kind("sleepSession").is_ok());
        assert!(validate_entity_kind("analytics_event-v2").is_ok());
    }

    #[test]
    fn test_entity_kind_invalid() {
        assert!(matches!(
            validate_entity_kind(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_entity_kind(&"a".repeat(65)),
            Err(ValidationError::TooLong { max: 64, .. })
        ));
        assert!(validate_entity_kind("_battle").is_err());
        assert!(validate_entity_kind("battle/join").is_err());
        assert!(validate_entity_kind("battle ").is_err());
    }

    #[test]
    fn test_entity_id_rules() {
        assert!(validate_entity_id("tmp-6f1c").is_ok());
        assert!(validate_entity_id("srv:1234").is_ok());
        assert!(validate_entity_id("   ").is_err());
        assert!(validate_entity_id("a/b").is_err());
        assert!(validate_entity_id("line\nbreak").is_err());
        assert!(validate_entity_id(&"x".repeat(129)).is_err());
    }
}
