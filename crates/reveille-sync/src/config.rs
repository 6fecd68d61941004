//! # Engine Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     REVEILLE_MAX_ATTEMPTS=8                                            │
//! │     REVEILLE_DATABASE_PATH=/data/reveille.db                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/reveille/engine.toml (Linux)                             │
//! │     ~/Library/Application Support/app.reveille.client/engine.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [queue]
//! max_attempts = 5
//!
//! [backoff]
//! base_delay_ms = 1000
//! max_delay_ms = 300000
//! jitter = 0.0
//!
//! [reconciler]
//! submit_timeout_ms = 15000
//! poll_interval_secs = 30
//! max_concurrent_lanes = 4
//!
//! [network]
//! debounce_ms = 500
//! start_online = false
//!
//! [storage]
//! database_path = "/data/reveille.db"
//! max_connections = 4
//!
//! [diagnostics]
//! degraded_after_failures = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Queue Settings
// =============================================================================

/// Action queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Submissions allowed per action before it is purged as a permanent
    /// failure. Default: 5
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_attempts: default_max_attempts(),
        }
    }
}

// =============================================================================
// Backoff Settings
// =============================================================================

/// Retry delay policy: `base_delay × 2^(attempts-1)`, capped at `max_delay`.
///
/// ## Schedule (defaults)
/// ```text
/// attempt 1 fails ──► wait 1s
/// attempt 2 fails ──► wait 2s
/// attempt 3 fails ──► wait 4s
/// ...
/// attempt n fails ──► wait min(2^(n-1) s, 300s)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// First retry delay (milliseconds).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Randomization factor in `[0, 1)`. 0 gives a deterministic schedule.
    #[serde(default)]
    pub jitter: f64,
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    300_000
}

impl Default for BackoffSettings {
    fn default() -> Self {
        BackoffSettings {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter: 0.0,
        }
    }
}

// =============================================================================
// Reconciler Settings
// =============================================================================

/// Drain cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Timeout for a single remote submission (milliseconds).
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_ms: u64,

    /// Interval of the periodic drain while online (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Lanes drained concurrently within one entity kind.
    #[serde(default = "default_max_concurrent_lanes")]
    pub max_concurrent_lanes: usize,
}

fn default_submit_timeout() -> u64 {
    15_000
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_concurrent_lanes() -> usize {
    4
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            submit_timeout_ms: default_submit_timeout(),
            poll_interval_secs: default_poll_interval(),
            max_concurrent_lanes: default_max_concurrent_lanes(),
        }
    }
}

// =============================================================================
// Network Settings
// =============================================================================

/// Connectivity monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Quiet period before a raw connectivity change is believed (milliseconds).
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Initial connectivity state before the platform reports anything.
    #[serde(default)]
    pub start_online: bool,
}

fn default_debounce() -> u64 {
    500
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            debounce_ms: default_debounce(),
            start_online: false,
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. `None` resolves to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Diagnostics Settings
// =============================================================================

/// Health reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    /// Consecutive failed store writes before the snapshot reports
    /// `storage_degraded`.
    #[serde(default = "default_degraded_after")]
    pub degraded_after_failures: u32,
}

fn default_degraded_after() -> u32 {
    3
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        DiagnosticsSettings {
            degraded_after_failures: default_degraded_after(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub backoff: BackoffSettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.queue.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.backoff.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "base_delay_ms must be greater than 0".into(),
            ));
        }

        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "max_delay_ms ({}) must be at least base_delay_ms ({})",
                self.backoff.max_delay_ms, self.backoff.base_delay_ms
            )));
        }

        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(SyncError::InvalidConfig(format!(
                "jitter must be in [0, 1), got {}",
                self.backoff.jitter
            )));
        }

        if self.reconciler.submit_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "submit_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.reconciler.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.reconciler.max_concurrent_lanes == 0 {
            return Err(SyncError::InvalidConfig(
                "max_concurrent_lanes must be greater than 0".into(),
            ));
        }

        if self.storage.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("REVEILLE_MAX_ATTEMPTS") {
            match value.parse::<u32>() {
                Ok(n) => {
                    debug!(max_attempts = n, "Overriding max attempts from environment");
                    self.queue.max_attempts = n;
                }
                Err(_) => warn!(value = %value, "Invalid REVEILLE_MAX_ATTEMPTS"),
            }
        }

        if let Ok(value) = std::env::var("REVEILLE_BACKOFF_BASE_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                self.backoff.base_delay_ms = ms;
            }
        }

        if let Ok(value) = std::env::var("REVEILLE_BACKOFF_MAX_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                self.backoff.max_delay_ms = ms;
            }
        }

        if let Ok(value) = std::env::var("REVEILLE_SUBMIT_TIMEOUT_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                debug!(timeout_ms = ms, "Overriding submit timeout from environment");
                self.reconciler.submit_timeout_ms = ms;
            }
        }

        if let Ok(value) = std::env::var("REVEILLE_POLL_INTERVAL_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.reconciler.poll_interval_secs = secs;
            }
        }

        if let Ok(value) = std::env::var("REVEILLE_DEBOUNCE_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                self.network.debounce_ms = ms;
            }
        }

        if let Ok(path) = std::env::var("REVEILLE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "reveille", "client")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    /// Returns the default database file path.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "reveille", "client")
            .map(|dirs| dirs.data_dir().join("reveille.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Resolved SQLite path (configured, else the platform default).
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage
            .database_path
            .clone()
            .or_else(Self::default_database_path)
    }

    pub fn max_attempts(&self) -> u32 {
        self.queue.max_attempts
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.reconciler.submit_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.network.debounce_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.backoff.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.backoff.max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.backoff.base_delay_ms, 1_000);
        assert_eq!(config.reconciler.max_concurrent_lanes, 4);
        assert!(!config.network.start_online);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.queue.max_attempts = 0;
        assert!(config.validate().unwrap_err().is_config_error());
        config.queue.max_attempts = 3;

        config.backoff.max_delay_ms = 10;
        assert!(config.validate().is_err());
        config.backoff.max_delay_ms = 60_000;

        config.backoff.jitter = 1.5;
        assert!(config.validate().is_err());
        config.backoff.jitter = 0.25;

        config.reconciler.max_concurrent_lanes = 0;
        assert!(config.validate().is_err());
        config.reconciler.max_concurrent_lanes = 1;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [queue]
            max_attempts = 9

            [network]
            start_online = true
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_attempts, 9);
        assert!(config.network.start_online);
        assert_eq!(config.network.debounce_ms, 500);
        assert_eq!(config.reconciler.submit_timeout_ms, 15_000);
    }

    #[test]
    fn test_storage_defaults_match_empty_section() {
        let built = EngineConfig::default();
        assert_eq!(built.storage.max_connections, 4);
        assert!(built.storage.database_path.is_none());

        let parsed: EngineConfig = toml::from_str("[storage]\n").unwrap();
        assert_eq!(parsed.storage.max_connections, built.storage.max_connections);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[queue]"));
        assert!(toml_str.contains("[backoff]"));
        assert!(toml_str.contains("[reconciler]"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("reveille-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("engine.toml");

        let mut config = EngineConfig::default();
        config.queue.max_attempts = 7;
        config.save(Some(path.clone())).unwrap();

        let loaded = EngineConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.queue.max_attempts, 7);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_duration_helpers() {
        let config = EngineConfig::default();
        assert_eq!(config.submit_timeout(), Duration::from_secs(15));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.base_delay(), Duration::from_secs(1));
    }
}
