// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Forward sync: copies newly created source records into the target.
//!
//! The forward syncer ("pursuer") runs on a fixed period. Each tick:
//! 1. Loads the checkpoint if none is held in memory (deriving an initial
//!    one from the oldest source record when the pointer file is absent)
//! 2. Defers if the advisory lock is held, dropping its in-memory state so
//!    the checkpoint is reloaded once the full reindex is done
//! 3. Fetches up to `window - buffered` source records created after the
//!    checkpoint, ascending, and buffers their anonymized form
//! 4. Flushes when the buffer is full, or when it was already non-empty at
//!    the start of the tick. The lock is checked again right before the
//!    write, deferring as in step 2 if a reindex took it during the fetch
//!
//! # Flush
//!
//! ```text
//! insert_many(buffer) → checkpoint = last.created_at → clear → persist pointer
//!                       (crash here = same records re-fetched, re-inserted)
//! ```
//!
//! The checkpoint only advances after a successful bulk insert, so a failed
//! or rejected flush keeps the buffer for the next tick.
//!
//! # Ticks are serialized
//!
//! Each tick is awaited before the next interval tick is taken
//! (`MissedTickBehavior::Delay`), so a slow tick delays the schedule instead
//! of overlapping with the next one.

use crate::anonymizer::anonymize;
use crate::checkpoint::{format_checkpoint, CheckpointStore};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::SyncSettings;
use crate::error::{ReplicationError, Result};
use crate::lock::AdvisoryLock;
use crate::metrics;
use crate::record::Customer;
use crate::store::{oldest, CollectionStore, Filter, FindOptions};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Derive the starting checkpoint for an empty pointer file.
///
/// Oldest source record's creation timestamp minus `margin`, or now if the
/// source is empty. Fails with a config error if the subtraction would leave
/// the representable range.
pub async fn initial_checkpoint(
    source: &dyn CollectionStore,
    margin: chrono::Duration,
) -> Result<DateTime<Utc>> {
    match oldest(source).await? {
        Some(record) => record.created_at.checked_sub_signed(margin).ok_or_else(|| {
            ReplicationError::Config(format!(
                "initial margin of {}s reaches before the earliest representable time",
                margin.num_seconds()
            ))
        }),
        None => Ok(Utc::now()),
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Lock held: nothing read or written, in-memory state discarded.
    Deferred { dropped: usize },
    /// Records added to the buffer; no flush this tick.
    Buffered { fetched: usize, buffered: usize },
    /// Buffer written to the target and checkpoint advanced.
    Flushed {
        fetched: usize,
        flushed: usize,
        checkpoint: DateTime<Utc>,
    },
    /// Nothing new in the source and nothing buffered.
    Idle,
}

impl TickOutcome {
    fn label(&self) -> &'static str {
        match self {
            TickOutcome::Deferred { .. } => "deferred",
            TickOutcome::Buffered { .. } => "buffered",
            TickOutcome::Flushed { .. } => "flushed",
            TickOutcome::Idle => "idle",
        }
    }
}

/// The forward syncer.
pub struct ForwardSyncer {
    source: Arc<dyn CollectionStore>,
    target: Arc<dyn CollectionStore>,
    lock: Arc<dyn AdvisoryLock>,
    checkpoints: CheckpointStore,
    circuit: Arc<CircuitBreaker>,
    window: usize,
    interval: Duration,
    initial_margin: chrono::Duration,

    /// In-memory checkpoint; `None` forces a reload on the next tick.
    checkpoint: Option<DateTime<Utc>>,
    /// Anonymized records fetched but not yet flushed.
    buffer: Vec<Customer>,
}

impl ForwardSyncer {
    pub fn new(
        source: Arc<dyn CollectionStore>,
        target: Arc<dyn CollectionStore>,
        lock: Arc<dyn AdvisoryLock>,
        checkpoints: CheckpointStore,
        circuit: Arc<CircuitBreaker>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            source,
            target,
            lock,
            checkpoints,
            circuit,
            window: settings.window.max(1),
            interval: settings.sync_interval_duration(),
            initial_margin: settings.initial_margin(),
            checkpoint: None,
            buffer: Vec::new(),
        }
    }

    /// The checkpoint currently held in memory.
    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.checkpoint
    }

    /// Number of anonymized records waiting to be flushed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Run one tick.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let checkpoint = self.ensure_checkpoint().await?;

        if self.lock.is_held().await? {
            return Ok(self.defer());
        }

        let had_pending = !self.buffer.is_empty();
        let fetched = self.fetch(checkpoint).await?;

        if self.buffer.len() >= self.window || had_pending {
            if self.lock.is_held().await? {
                return Ok(self.defer());
            }
            let (flushed, checkpoint) = self.flush().await?;
            return Ok(TickOutcome::Flushed {
                fetched,
                flushed,
                checkpoint,
            });
        }

        if self.buffer.is_empty() {
            Ok(TickOutcome::Idle)
        } else {
            Ok(TickOutcome::Buffered {
                fetched,
                buffered: self.buffer.len(),
            })
        }
    }

    /// Drop the buffer and the in-memory checkpoint while a reindex runs.
    fn defer(&mut self) -> TickOutcome {
        let dropped = self.buffer.len();
        self.checkpoint = None;
        self.buffer.clear();
        metrics::record_lock_contention("forward_sync");
        metrics::record_forward_buffer_dropped(dropped);
        debug!(dropped, "Lock held, deferring forward sync");
        TickOutcome::Deferred { dropped }
    }

    async fn ensure_checkpoint(&mut self) -> Result<DateTime<Utc>> {
        if let Some(checkpoint) = self.checkpoint {
            return Ok(checkpoint);
        }

        let checkpoint = match self.checkpoints.load().await? {
            Some(stored) => stored,
            None => {
                let derived = initial_checkpoint(self.source.as_ref(), self.initial_margin).await?;
                info!(checkpoint = %format_checkpoint(&derived), "No checkpoint on disk, derived initial checkpoint");
                derived
            }
        };

        self.checkpoint = Some(checkpoint);
        Ok(checkpoint)
    }

    /// Fetch the next slice of the source into the buffer.
    ///
    /// Buffered records are still after the checkpoint, so they are skipped.
    async fn fetch(&mut self, checkpoint: DateTime<Utc>) -> Result<usize> {
        let room = self.window.saturating_sub(self.buffer.len());
        if room == 0 {
            return Ok(0);
        }

        let records = self
            .source
            .find(
                Filter::CreatedAfter(checkpoint),
                FindOptions::ascending().skip(self.buffer.len()).limit(room),
            )
            .await?;

        // Anonymize the whole slice before buffering any of it.
        let anonymized = records.iter().map(anonymize).collect::<Result<Vec<_>>>()?;
        let fetched = anonymized.len();
        self.buffer.extend(anonymized);

        if fetched > 0 {
            metrics::record_forward_buffered(fetched);
            debug!(fetched, buffered = self.buffer.len(), "Buffered source records");
        }
        Ok(fetched)
    }

    /// Write the buffer to the target and advance the checkpoint.
    async fn flush(&mut self) -> Result<(usize, DateTime<Utc>)> {
        let Some(last) = self.buffer.last().map(|r| r.created_at) else {
            return Err(ReplicationError::Internal("flush called with empty buffer".to_string()));
        };

        let start = Instant::now();
        let batch = self.buffer.clone();
        let count = batch.len();
        let target = Arc::clone(&self.target);
        let inserted = self
            .circuit
            .protect(|| async move { target.insert_many(batch).await })
            .await?;

        self.checkpoint = Some(last);
        self.buffer.clear();
        metrics::record_forward_flush(count, start.elapsed());
        if inserted < count {
            debug!(count, inserted, "Some flushed records were already in the target");
        }

        if let Err(e) = self.checkpoints.store(last).await {
            metrics::record_checkpoint_persist(false);
            return Err(e);
        }
        metrics::set_checkpoint_timestamp(last.timestamp_millis() as f64 / 1000.0);

        Ok((count, last))
    }

    /// Flush a leftover partial batch on shutdown, unless the lock is held.
    async fn drain(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        match self.lock.is_held().await {
            Ok(false) => match self.flush().await {
                Ok((flushed, checkpoint)) => {
                    info!(flushed, checkpoint = %format_checkpoint(&checkpoint), "Flushed pending batch on shutdown");
                }
                Err(e) => {
                    warn!(error = %e, pending = self.buffer.len(), "Failed to flush pending batch on shutdown");
                }
            },
            Ok(true) => {
                debug!(pending = self.buffer.len(), "Lock held at shutdown, dropping pending batch");
            }
            Err(e) => {
                warn!(error = %e, "Could not check lock at shutdown, dropping pending batch");
            }
        }
    }

    /// Run ticks on the configured period until shutdown is signaled.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = info_span!("forward_sync", window = self.window);

        async move {
            info!(interval_ms = self.interval.as_millis() as u64, "Starting forward sync");

            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() {
                            info!("Shutdown channel closed");
                            break;
                        }
                        if *shutdown_rx.borrow() {
                            info!("Shutdown signal received");
                            break;
                        }
                    }

                    _ = timer.tick() => {
                        let result = self.tick().await;
                        log_tick_result(&result);
                    }
                }
            }

            self.drain().await;
            info!("Forward sync stopped");
        }
        .instrument(span)
        .await;
    }
}

fn log_tick_result(result: &Result<TickOutcome>) {
    match result {
        Ok(outcome) => {
            metrics::record_forward_tick(outcome.label());
            match outcome {
                TickOutcome::Flushed {
                    fetched,
                    flushed,
                    checkpoint,
                } => {
                    info!(fetched, flushed, checkpoint = %format_checkpoint(checkpoint), "Flushed batch to target");
                }
                TickOutcome::Buffered { fetched, buffered } => {
                    debug!(fetched, buffered, "Tick buffered records");
                }
                TickOutcome::Deferred { .. } | TickOutcome::Idle => {}
            }
        }
        Err(e) => {
            metrics::record_forward_tick("error");
            metrics::record_error("forward_sync", e.kind());
            if e.is_retryable() {
                warn!(error = %e, "Forward sync tick failed, retrying next tick");
            } else {
                error!(error = %e, "Forward sync tick failed (will not succeed without intervention)");
            }
        }
    }
}
