// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! Runs continuous mode: the forward syncer
//! ([`crate::pursuer::ForwardSyncer`]) and the reconciler
//! ([`crate::reconciler::Reconciler`]) as two tasks sharing one advisory lock
//! and one circuit breaker on target writes.
//!
//! # Lifecycle
//!
//! 1. [`ReplicationEngine::new`] wires the stores and the lock
//! 2. [`ReplicationEngine::start`] validates config and spawns both tasks
//! 3. [`ReplicationEngine::shutdown`] signals them and waits for them to drain
//!
//! The full reindex is not part of the engine; it is a separate one-shot
//! mode (see [`crate::reindex`]).

mod types;

pub use types::EngineState;

use crate::checkpoint::CheckpointStore;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::lock::AdvisoryLock;
use crate::metrics;
use crate::pursuer::ForwardSyncer;
use crate::reconciler::Reconciler;
use crate::resilience::RetryConfig;
use crate::store::CollectionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The continuous-mode replication engine.
pub struct ReplicationEngine {
    config: ReplicationConfig,

    source: Arc<dyn CollectionStore>,
    target: Arc<dyn CollectionStore>,

    /// Shared by both actors.
    lock: Arc<dyn AdvisoryLock>,

    /// Circuit breaker for target writes (shared by both actors).
    circuit: Arc<CircuitBreaker>,

    /// Backoff after a failed reconciliation pass.
    retry: RetryConfig,

    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    handles: RwLock<Vec<JoinHandle<()>>>,
}

impl ReplicationEngine {
    /// Create an engine in `Created` state. Nothing runs until
    /// [`start()`](Self::start).
    pub fn new(
        config: ReplicationConfig,
        source: Arc<dyn CollectionStore>,
        target: Arc<dyn CollectionStore>,
        lock: Arc<dyn AdvisoryLock>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            source,
            target,
            lock,
            circuit: Arc::new(CircuitBreaker::target_writes()),
            retry: RetryConfig::daemon(),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            handles: RwLock::new(Vec::new()),
        }
    }

    /// Replace the target-write circuit breaker.
    pub fn with_circuit(mut self, circuit: CircuitBreaker) -> Self {
        self.circuit = Arc::new(circuit);
        self
    }

    /// Replace the reconciler's failure backoff.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn circuit(&self) -> &Arc<CircuitBreaker> {
        &self.circuit
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(state.as_str());
    }

    /// Start the forward syncer and the reconciler.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        if let Err(e) = self.config.validate() {
            error!(error = %e, "Refusing to start with invalid configuration");
            self.set_state(EngineState::Failed);
            return Err(e);
        }

        info!(
            source = %self.source.name(),
            target = %self.target.name(),
            window = self.config.settings.window,
            "Starting replication engine"
        );

        let settings = &self.config.settings;
        let syncer = ForwardSyncer::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            Arc::clone(&self.lock),
            CheckpointStore::new(&self.config.checkpoint.path),
            Arc::clone(&self.circuit),
            settings,
        );
        let reconciler = Reconciler::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            Arc::clone(&self.lock),
            Arc::clone(&self.circuit),
            settings,
        )
        .with_retry(self.retry.clone());

        let mut handles = self.handles.write().await;
        handles.push(tokio::spawn(syncer.run(self.shutdown_rx.clone())));
        handles.push(tokio::spawn(reconciler.run(self.shutdown_rx.clone())));
        drop(handles);

        self.set_state(EngineState::Running);
        info!("Replication engine running");
        Ok(())
    }

    /// Shutdown the engine gracefully.
    ///
    /// 1. Signal both tasks to stop
    /// 2. Wait for them (the forward syncer flushes a pending batch on the way out)
    pub async fn shutdown(&mut self) {
        info!("Shutting down replication engine");
        self.set_state(EngineState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for tasks to drain and complete");
        }

        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {
                    debug!(task = i + 1, "Task completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(task = i + 1, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    warn!(task = i + 1, "Task timed out during shutdown (pending batch may be lost)");
                }
            }
        }

        self.set_state(EngineState::Stopped);
        info!("Replication engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::FileLock;
    use crate::store::MemoryCollection;
    use tempfile::tempdir;

    fn engine(dir: &std::path::Path) -> ReplicationEngine {
        let mut config = ReplicationConfig::for_testing("sqlite::memory:");
        config.checkpoint.path = dir.join("sync-pointer").display().to_string();
        config.lock.path = dir.join("sync.lock").display().to_string();
        config.settings.sync_interval = "10ms".to_string();

        ReplicationEngine::new(
            config,
            Arc::new(MemoryCollection::new("customers")),
            Arc::new(MemoryCollection::new("customers_anonymised")),
            Arc::new(FileLock::new(dir.join("sync.lock"))),
        )
        .with_retry(RetryConfig::testing())
    }

    #[test]
    fn test_new_engine_is_created() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        assert_eq!(engine.state(), EngineState::Created);
        assert!(!engine.is_running());
        assert_eq!(engine.circuit().name(), "target_writes");
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempdir().unwrap();
        let mut engine = engine(dir.path());
        let mut states = engine.state_receiver();

        engine.start().await.unwrap();
        assert!(engine.is_running());
        assert_eq!(*states.borrow_and_update(), EngineState::Running);

        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let dir = tempdir().unwrap();
        let mut engine = engine(dir.path());

        engine.start().await.unwrap();
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidState { .. }));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_fails_start() {
        let dir = tempdir().unwrap();
        let mut engine = engine(dir.path());
        engine.config.target_collection = engine.config.source_collection.clone();

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, ReplicationError::Config(_)));
        assert_eq!(engine.state(), EngineState::Failed);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let dir = tempdir().unwrap();
        let mut engine = engine(dir.path());

        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
