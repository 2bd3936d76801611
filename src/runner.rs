// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Invocation modes of the `anon-replicator` binary.
//!
//! | Situation                          | Status          | Exit |
//! |------------------------------------|-----------------|------|
//! | Required settings missing/invalid  | `NotConfigured` | 0    |
//! | Full reindex, lock already held    | `LockHeld`      | 0    |
//! | Mode ran to completion             | `Completed`     | 0    |
//! | Store, reindex or engine failure   | `Failed`        | 1    |
//!
//! A held lock is detected before the store is opened.

use crate::checkpoint::CheckpointStore;
use crate::config::ReplicationConfig;
use crate::coordinator::ReplicationEngine;
use crate::error::ReplicationError;
use crate::lock::{AdvisoryLock, FileLock};
use crate::reindex::{FullReindexer, ReindexOutcome};
use crate::store::{SqliteCollection, SqliteStore};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NotConfigured,
    LockHeld,
    Completed,
    Failed,
}

impl RunStatus {
    /// Only `Failed` maps to a non-zero exit code.
    pub fn is_success(&self) -> bool {
        !matches!(self, RunStatus::Failed)
    }
}

/// Load and validate configuration; `None` means there is nothing to do.
pub fn load_config(lookup: impl Fn(&str) -> Option<String>) -> Option<ReplicationConfig> {
    match ReplicationConfig::from_lookup(lookup).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => Some(config),
        Err(e) => {
            debug!(error = %e, "Not configured, nothing to do");
            None
        }
    }
}

async fn open_collections(
    store: &SqliteStore,
    config: &ReplicationConfig,
) -> Result<(SqliteCollection, SqliteCollection), ReplicationError> {
    let source = store.collection(&config.source_collection).await?;
    let target = store.collection(&config.target_collection).await?;
    Ok((source, target))
}

/// One-shot full reindex under the advisory lock.
pub async fn full_reindex(config: &ReplicationConfig) -> RunStatus {
    let lock = Arc::new(FileLock::new(&config.lock.path));
    match lock.is_held().await {
        Ok(false) => {}
        Ok(true) => {
            info!(path = %config.lock.path, "Lock already held, not reindexing");
            return RunStatus::LockHeld;
        }
        Err(e) => {
            error!(error = %e, "Could not check lock");
            return RunStatus::Failed;
        }
    }

    let store = match SqliteStore::connect(&config.store_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to open store");
            return RunStatus::Failed;
        }
    };

    let result = async {
        let (source, target) = open_collections(&store, config).await?;
        FullReindexer::new(
            Arc::new(source),
            Arc::new(target),
            lock,
            CheckpointStore::new(&config.checkpoint.path),
            &config.settings,
        )
        .run()
        .await
    }
    .await;
    store.close().await;

    match result {
        Ok(ReindexOutcome::Completed(_)) => RunStatus::Completed,
        Ok(ReindexOutcome::LockHeld) => RunStatus::LockHeld,
        Err(e) => {
            error!(error = %e, "Full reindex failed");
            RunStatus::Failed
        }
    }
}

/// Continuous mode: run the engine until `shutdown` resolves.
pub async fn continuous(config: ReplicationConfig, shutdown: impl Future<Output = ()>) -> RunStatus {
    let store = match SqliteStore::connect(&config.store_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to open store");
            return RunStatus::Failed;
        }
    };

    let (source, target) = match open_collections(&store, &config).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "Failed to open collections");
            store.close().await;
            return RunStatus::Failed;
        }
    };

    let lock = Arc::new(FileLock::new(&config.lock.path));
    let mut engine = ReplicationEngine::new(config, Arc::new(source), Arc::new(target), lock);
    if let Err(e) = engine.start().await {
        error!(error = %e, "Failed to start replication engine");
        store.close().await;
        return RunStatus::Failed;
    }

    shutdown.await;

    engine.shutdown().await;
    store.close().await;
    RunStatus::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ENV_SOURCE_COLLECTION, ENV_STORE_URL, ENV_TARGET_COLLECTION};
    use crate::record::{Address, Customer, RecordId};
    use crate::store::{CollectionStore, Filter};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn customer(id: &str, offset_sec: i64) -> Customer {
        Customer {
            id: RecordId::new(id),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: "jane.doe@example.com".into(),
            address: Address {
                line1: "1 Main Street".into(),
                line2: String::new(),
                postcode: "SW1A1AA".into(),
                city: "London".into(),
                state: "Greater London".into(),
                country: "GB".into(),
            },
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + ChronoDuration::seconds(offset_sec),
        }
    }

    fn config(dir: &Path) -> ReplicationConfig {
        let mut config = ReplicationConfig::for_testing(&format!("sqlite://{}", dir.join("store.db").display()));
        config.checkpoint.path = dir.join("sync-pointer").display().to_string();
        config.lock.path = dir.join("sync.lock").display().to_string();
        config.settings.sync_interval = "10ms".to_string();
        config.settings.reconcile_idle_backoff = "10ms".to_string();
        config
    }

    async fn seed_source(config: &ReplicationConfig, records: Vec<Customer>) {
        let store = SqliteStore::connect(&config.store_url).await.unwrap();
        store
            .collection(&config.source_collection)
            .await
            .unwrap()
            .insert_many(records)
            .await
            .unwrap();
        store.close().await;
    }

    async fn target_count(config: &ReplicationConfig) -> u64 {
        let store = SqliteStore::connect(&config.store_url).await.unwrap();
        let count = store
            .collection(&config.target_collection)
            .await
            .unwrap()
            .count(Filter::All)
            .await
            .unwrap();
        store.close().await;
        count
    }

    #[test]
    fn test_only_failure_is_unsuccessful() {
        assert!(RunStatus::NotConfigured.is_success());
        assert!(RunStatus::LockHeld.is_success());
        assert!(RunStatus::Completed.is_success());
        assert!(!RunStatus::Failed.is_success());
    }

    #[test]
    fn test_load_config_missing_or_invalid_is_none() {
        assert!(load_config(|_| None).is_none());

        let same: HashMap<&str, &str> = [
            (ENV_STORE_URL, "sqlite://x.db"),
            (ENV_SOURCE_COLLECTION, "customers"),
            (ENV_TARGET_COLLECTION, "customers"),
        ]
        .into_iter()
        .collect();
        assert!(load_config(|k| same.get(k).map(|v| v.to_string())).is_none());

        let valid: HashMap<&str, &str> = [
            (ENV_STORE_URL, "sqlite://x.db"),
            (ENV_SOURCE_COLLECTION, "customers"),
            (ENV_TARGET_COLLECTION, "customers_anonymised"),
        ]
        .into_iter()
        .collect();
        assert!(load_config(|k| valid.get(k).map(|v| v.to_string())).is_some());
    }

    #[tokio::test]
    async fn test_full_reindex_lock_held_never_opens_store() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        std::fs::write(&config.lock.path, "").unwrap();

        assert_eq!(full_reindex(&config).await, RunStatus::LockHeld);
        assert!(!dir.path().join("store.db").exists());
        assert!(Path::new(&config.lock.path).exists());
    }

    #[tokio::test]
    async fn test_full_reindex_completes() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        seed_source(&config, (0..4).map(|i| customer(&format!("c-{}", i), i)).collect()).await;

        assert_eq!(full_reindex(&config).await, RunStatus::Completed);
        assert_eq!(target_count(&config).await, 4);
        assert!(Path::new(&config.checkpoint.path).exists());
        assert!(!Path::new(&config.lock.path).exists());
    }

    #[tokio::test]
    async fn test_full_reindex_failure_releases_lock() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let mut broken = customer("bad", 0);
        broken.email = "no-at-sign".into();
        seed_source(&config, vec![broken]).await;

        assert_eq!(full_reindex(&config).await, RunStatus::Failed);
        assert!(!Path::new(&config.lock.path).exists());
        assert!(!Path::new(&config.checkpoint.path).exists());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.store_url = format!("sqlite://{}", dir.path().join("missing/dir/store.db").display());

        assert_eq!(full_reindex(&config).await, RunStatus::Failed);
        assert_eq!(continuous(config, async {}).await, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_continuous_replicates_until_shutdown() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        seed_source(&config, (0..3).map(|i| customer(&format!("c-{}", i), i)).collect()).await;

        let status = continuous(config.clone(), tokio::time::sleep(Duration::from_millis(500))).await;

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(target_count(&config).await, 3);
    }
}
