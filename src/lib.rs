// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Anonymizing Replication Engine
//!
//! Continuously copies customer records from a source collection into a
//! target collection, replacing personally identifying fields with
//! deterministic pseudonyms on the way.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                        anon-replication-engine                            │
//! │                                                                           │
//! │  source ──► ForwardSyncer ──► anonymize ──► buffer ──► insert_many ──► target
//! │                  │                                         │              │
//! │                  ▼                                         ▼              │
//! │           CheckpointStore                           CircuitBreaker        │
//! │           (pointer file)                                   ▲              │
//! │                                                            │              │
//! │  target ──► Reconciler ──► lookup source ──► diff ──► update_one          │
//! │                                                                           │
//! │              AdvisoryLock (lock file): held only by FullReindexer         │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Three actors
//!
//! 1. **Forward sync** ([`pursuer`]): tails the source by creation timestamp
//! 2. **Reconciler** ([`reconciler`]): propagates later source edits
//! 3. **Full reindex** ([`reindex`]): one-shot rebuild under the lock
//!
//! The first two run together in continuous mode via [`ReplicationEngine`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use anon_replication_engine::{FileLock, ReplicationConfig, ReplicationEngine, SqliteStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> anon_replication_engine::Result<()> {
//! let config = ReplicationConfig::from_env()?;
//! let store = SqliteStore::connect(&config.store_url).await?;
//! let source = Arc::new(store.collection(&config.source_collection).await?);
//! let target = Arc::new(store.collection(&config.target_collection).await?);
//! let lock = Arc::new(FileLock::new(&config.lock.path));
//!
//! let mut engine = ReplicationEngine::new(config, source, target, lock);
//! engine.start().await?;
//! tokio::signal::ctrl_c().await.ok();
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod anonymizer;
pub mod checkpoint;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod pursuer;
pub mod reconciler;
pub mod record;
pub mod reindex;
pub mod resilience;
pub mod runner;
pub mod store;

// Re-exports for convenience
pub use anonymizer::{anonymize, pseudonym};
pub use checkpoint::CheckpointStore;
pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use config::{ReplicationConfig, SyncSettings};
pub use coordinator::{EngineState, ReplicationEngine};
pub use error::{ReplicationError, Result};
pub use lock::{AdvisoryLock, FileLock};
pub use pursuer::{ForwardSyncer, TickOutcome};
pub use reconciler::{PassOutcome, PassReport, Reconciler};
pub use record::{Address, Customer, RecordId, RecordPatch};
pub use reindex::{FullReindexer, ReindexOutcome, ReindexReport};
pub use store::{CollectionStore, Filter, FindOptions, MemoryCollection, SqliteCollection, SqliteStore};
