//! Record fixtures and a temp-dir harness for lock and checkpoint files.

use super::mock_store::MockCollection;
use anon_replication_engine::anonymizer::anonymize;
use anon_replication_engine::circuit_breaker::{CircuitBreaker, CircuitConfig};
use anon_replication_engine::config::{ReplicationConfig, SyncSettings};
use anon_replication_engine::record::{Address, Customer, RecordId};
use anon_replication_engine::{CheckpointStore, FileLock, ForwardSyncer, FullReindexer, Reconciler};
use anon_replication_engine::resilience::RetryConfig;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Fixed reference instant for fixtures.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// A customer created `offset_sec` seconds after [`t0`].
pub fn customer(id: &str, offset_sec: i64) -> Customer {
    Customer {
        id: RecordId::new(id),
        first_name: "Jane".into(),
        last_name: "Doe".into(),
        email: "jane.doe@example.com".into(),
        address: Address {
            line1: "1 Main Street".into(),
            line2: "Flat 2".into(),
            postcode: "SW1A1AA".into(),
            city: "London".into(),
            state: "Greater London".into(),
            country: "GB".into(),
        },
        created_at: t0() + Duration::seconds(offset_sec),
    }
}

/// `n` customers one second apart, ids `c-000`, `c-001`, ...
pub fn customers(n: usize) -> Vec<Customer> {
    (0..n).map(|i| customer(&format!("c-{:03}", i), i as i64)).collect()
}

/// Source, target, lock and checkpoint file in a fresh temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub source: Arc<MockCollection>,
    pub target: Arc<MockCollection>,
    pub lock: Arc<FileLock>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(FileLock::new(dir.path().join("sync.lock")));
        Self {
            dir,
            source: Arc::new(MockCollection::new("customers")),
            target: Arc::new(MockCollection::new("customers_anonymised")),
            lock,
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("sync-pointer")
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.checkpoint_path())
    }

    /// Seed both sides as if `records` had already been replicated.
    pub fn replicate(&self, records: &[Customer]) {
        self.target
            .inner()
            .seed(records.iter().map(|r| anonymize(r).unwrap()));
        self.source.inner().seed(records.iter().cloned());
    }

    pub fn config(&self) -> ReplicationConfig {
        let mut config = ReplicationConfig::for_testing("sqlite::memory:");
        config.checkpoint.path = self.checkpoint_path().display().to_string();
        config.lock.path = self.dir.path().join("sync.lock").display().to_string();
        config.settings = fast_settings();
        config
    }

    pub fn syncer(&self, settings: &SyncSettings) -> ForwardSyncer {
        self.syncer_with_circuit(settings, CircuitBreaker::target_writes())
    }

    pub fn syncer_with_circuit(&self, settings: &SyncSettings, circuit: CircuitBreaker) -> ForwardSyncer {
        ForwardSyncer::new(
            self.source.clone(),
            self.target.clone(),
            self.lock.clone(),
            self.checkpoints(),
            Arc::new(circuit),
            settings,
        )
    }

    pub fn reconciler(&self, settings: &SyncSettings) -> Reconciler {
        Reconciler::new(
            self.source.clone(),
            self.target.clone(),
            self.lock.clone(),
            Arc::new(CircuitBreaker::new("target_writes", CircuitConfig::testing())),
            settings,
        )
        .with_retry(RetryConfig::testing())
    }

    pub fn reindexer(&self, settings: &SyncSettings) -> FullReindexer {
        FullReindexer::new(
            self.source.clone(),
            self.target.clone(),
            self.lock.clone(),
            self.checkpoints(),
            settings,
        )
    }
}

/// Short intervals so background tasks make progress quickly in tests.
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        sync_interval: "10ms".to_string(),
        lock_backoff: "20ms".to_string(),
        reconcile_idle_backoff: "10ms".to_string(),
        ..Default::default()
    }
}

/// Poll `condition` every 10ms until it holds or `timeout_ms` elapses.
pub async fn eventually(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}
