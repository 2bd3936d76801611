// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the replication engine.
//!
//! Read once at startup (from the environment, or deserialized from
//! YAML/JSON), validated, then passed into each component's constructor.
//! Nothing re-reads the environment after that.
//!
//! # Quick Start
//!
//! ```rust
//! use anon_replication_engine::config::ReplicationConfig;
//!
//! let config = ReplicationConfig::for_testing("sqlite://data/customers.db");
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── store_url: String             # sqlite://... connection string
//! ├── source_collection: String     # e.g. "customers"
//! ├── target_collection: String     # e.g. "customers_anonymised"
//! ├── settings: SyncSettings
//! │   ├── window                    # forward-sync buffer size (1000)
//! │   ├── sync_interval             # forward-sync tick period ("1s")
//! │   ├── lock_backoff              # reconciler poll while locked ("3s")
//! │   ├── reconcile_page_size       # target scan page size (500)
//! │   ├── reconcile_idle_backoff    # pause after an empty pass ("1s")
//! │   ├── initial_margin_sec        # initial checkpoint margin (60)
//! │   └── reconcile_rate_limit_per_sec (off)
//! ├── checkpoint: CheckpointConfig  # pointer file path
//! └── lock: LockConfig              # lock marker file path
//! ```
//!
//! # Environment
//!
//! | Variable | Field |
//! |----------|-------|
//! | `REPLICATION_STORE_URL` | `store_url` (required) |
//! | `REPLICATION_SOURCE_COLLECTION` | `source_collection` (required) |
//! | `REPLICATION_TARGET_COLLECTION` | `target_collection` (required) |
//! | `REPLICATION_WINDOW` | `settings.window` |
//! | `REPLICATION_SYNC_INTERVAL` | `settings.sync_interval` |
//! | `REPLICATION_LOCK_BACKOFF` | `settings.lock_backoff` |
//! | `REPLICATION_RECONCILE_RATE_LIMIT` | `settings.reconcile_rate_limit_per_sec` |
//! | `REPLICATION_CHECKPOINT_PATH` | `checkpoint.path` |
//! | `REPLICATION_LOCK_PATH` | `lock.path` |

use crate::error::{ReplicationError, Result};
use crate::resilience::RateLimitConfig;
use crate::store::sqlite::is_valid_collection_name;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_STORE_URL: &str = "REPLICATION_STORE_URL";
pub const ENV_SOURCE_COLLECTION: &str = "REPLICATION_SOURCE_COLLECTION";
pub const ENV_TARGET_COLLECTION: &str = "REPLICATION_TARGET_COLLECTION";
pub const ENV_WINDOW: &str = "REPLICATION_WINDOW";
pub const ENV_SYNC_INTERVAL: &str = "REPLICATION_SYNC_INTERVAL";
pub const ENV_LOCK_BACKOFF: &str = "REPLICATION_LOCK_BACKOFF";
pub const ENV_RECONCILE_RATE_LIMIT: &str = "REPLICATION_RECONCILE_RATE_LIMIT";
pub const ENV_CHECKPOINT_PATH: &str = "REPLICATION_CHECKPOINT_PATH";
pub const ENV_LOCK_PATH: &str = "REPLICATION_LOCK_PATH";

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Store connection string.
    pub store_url: String,

    /// Collection holding the real customer records.
    pub source_collection: String,

    /// Collection receiving the anonymized copies.
    pub target_collection: String,

    #[serde(default)]
    pub settings: SyncSettings,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            store_url: String::new(),
            source_collection: "customers".to_string(),
            target_collection: "customers_anonymised".to_string(),
            settings: SyncSettings::default(),
            checkpoint: CheckpointConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(store_url: &str) -> Self {
        Self {
            store_url: store_url.to_string(),
            ..Default::default()
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (the environment, a map in tests).
    ///
    /// Store URL and both collection names are required. Everything else
    /// falls back to its default when absent or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| ReplicationError::Config(format!("{} is not set", key)))
        };

        let mut settings = SyncSettings {
            window: parse_window(get(ENV_WINDOW).as_deref()),
            ..Default::default()
        };
        if let Some(interval) = get(ENV_SYNC_INTERVAL) {
            settings.sync_interval = interval;
        }
        if let Some(backoff) = get(ENV_LOCK_BACKOFF) {
            settings.lock_backoff = backoff;
        }
        settings.reconcile_rate_limit_per_sec = get(ENV_RECONCILE_RATE_LIMIT)
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|&rate| rate > 0);

        let mut config = Self {
            store_url: required(ENV_STORE_URL)?,
            source_collection: required(ENV_SOURCE_COLLECTION)?,
            target_collection: required(ENV_TARGET_COLLECTION)?,
            settings,
            ..Default::default()
        };
        if let Some(path) = get(ENV_CHECKPOINT_PATH) {
            config.checkpoint.path = path;
        }
        if let Some(path) = get(ENV_LOCK_PATH) {
            config.lock.path = path;
        }

        Ok(config)
    }

    /// Check the settings every component relies on.
    pub fn validate(&self) -> Result<()> {
        if self.store_url.trim().is_empty() {
            return Err(ReplicationError::Config("store_url is empty".to_string()));
        }
        for (field, name) in [
            ("source_collection", &self.source_collection),
            ("target_collection", &self.target_collection),
        ] {
            if !is_valid_collection_name(name) {
                return Err(ReplicationError::Config(format!(
                    "{} {:?} must be a non-empty identifier (letters, digits, '_')",
                    field, name
                )));
            }
        }
        if self.source_collection == self.target_collection {
            return Err(ReplicationError::Config(
                "source and target collections must differ".to_string(),
            ));
        }
        if self.settings.window == 0 {
            return Err(ReplicationError::Config("window must be positive".to_string()));
        }
        if self.settings.initial_margin_sec > MAX_INITIAL_MARGIN_SEC {
            return Err(ReplicationError::Config(format!(
                "initial_margin_sec {} exceeds the maximum of {}",
                self.settings.initial_margin_sec, MAX_INITIAL_MARGIN_SEC
            )));
        }
        Ok(())
    }
}

/// Window size from its raw setting: absent, non-numeric or zero means default.
pub fn parse_window(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&w| w > 0)
        .unwrap_or_else(default_window)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncSettings: forward sync and reconciliation tuning
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for the forward syncer and the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Forward-sync buffer size; a full buffer is flushed in one bulk insert.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Forward-sync tick period as a duration string (e.g., "1s").
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,

    /// How long the reconciler waits between lock checks while locked.
    #[serde(default = "default_lock_backoff")]
    pub lock_backoff: String,

    /// Target records fetched per page while reconciling.
    #[serde(default = "default_reconcile_page_size")]
    pub reconcile_page_size: usize,

    /// Pause after a reconciliation pass that found no target records.
    #[serde(default = "default_reconcile_idle_backoff")]
    pub reconcile_idle_backoff: String,

    /// Initial checkpoint = oldest source record minus this many seconds.
    #[serde(default = "default_initial_margin_sec")]
    pub initial_margin_sec: u64,

    /// Optional cap on reconciliation lookups per second. Off when `None`.
    #[serde(default)]
    pub reconcile_rate_limit_per_sec: Option<u32>,
}

fn default_window() -> usize {
    1000
}

fn default_sync_interval() -> String {
    "1s".to_string()
}

fn default_lock_backoff() -> String {
    "3s".to_string()
}

fn default_reconcile_page_size() -> usize {
    500
}

fn default_reconcile_idle_backoff() -> String {
    "1s".to_string()
}

/// Largest accepted `initial_margin_sec` (ten years).
pub const MAX_INITIAL_MARGIN_SEC: u64 = 10 * 365 * 24 * 60 * 60;

fn default_initial_margin_sec() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            window: default_window(),
            sync_interval: default_sync_interval(),
            lock_backoff: default_lock_backoff(),
            reconcile_page_size: default_reconcile_page_size(),
            reconcile_idle_backoff: default_reconcile_idle_backoff(),
            initial_margin_sec: default_initial_margin_sec(),
            reconcile_rate_limit_per_sec: None,
        }
    }
}

impl SyncSettings {
    /// Parse the sync_interval string to a Duration.
    pub fn sync_interval_duration(&self) -> Duration {
        parse_duration_or(&self.sync_interval, Duration::from_secs(1))
    }

    /// Parse the lock_backoff string to a Duration.
    pub fn lock_backoff_duration(&self) -> Duration {
        parse_duration_or(&self.lock_backoff, Duration::from_secs(3))
    }

    /// Parse the reconcile_idle_backoff string to a Duration.
    pub fn reconcile_idle_backoff_duration(&self) -> Duration {
        parse_duration_or(&self.reconcile_idle_backoff, Duration::from_secs(1))
    }

    /// Initial checkpoint margin, capped at [`MAX_INITIAL_MARGIN_SEC`].
    pub fn initial_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.initial_margin_sec.min(MAX_INITIAL_MARGIN_SEC) as i64)
    }

    /// Rate limit configuration for reconciliation, if enabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        self.reconcile_rate_limit_per_sec.map(RateLimitConfig::per_second)
    }
}

fn parse_duration_or(raw: &str, fallback: Duration) -> Duration {
    match humantime::parse_duration(raw) {
        Ok(d) if !d.is_zero() => d,
        _ => fallback,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CheckpointConfig / LockConfig: the two coordination files
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the forward-sync checkpoint is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub path: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: "sync-pointer".to_string(),
        }
    }
}

/// Where the advisory lock marker lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    pub path: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            path: "sync.lock".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
