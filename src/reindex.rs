// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-shot full reindex.
//!
//! Runs under the advisory lock, so both continuous actors stay off the
//! target while it works:
//!
//! 1. **Reconcile existing**: one pass over the target, correcting records
//!    whose source changed. Remembers the creation timestamp of the last
//!    target record whose source still exists.
//! 2. **Catch up**: insert every source record newer than that timestamp
//!    (or newer than the derived initial checkpoint if nothing matched),
//!    advancing the pointer after each insert.
//! 3. **Persist**: store the final pointer as the forward-sync checkpoint.
//!
//! The lock is released on every exit path, including a panic inside a phase.

use crate::anonymizer::anonymize;
use crate::checkpoint::{format_checkpoint, CheckpointStore};
use crate::config::SyncSettings;
use crate::error::Result;
use crate::lock::AdvisoryLock;
use crate::metrics;
use crate::pursuer::initial_checkpoint;
use crate::reconciler::{plan_reconcile, ReconcilePlan};
use crate::store::{scan, CollectionStore, Filter, FindOptions};
use chrono::{DateTime, Utc};
use futures::{FutureExt, TryStreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Counts from a completed reindex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexReport {
    pub examined: usize,
    pub updated: usize,
    pub missing_source: usize,
    pub inserted: usize,
    /// Pointer written to the checkpoint store.
    pub checkpoint: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexOutcome {
    /// Someone else holds the lock; nothing was read or written.
    LockHeld,
    Completed(ReindexReport),
}

pub struct FullReindexer {
    source: Arc<dyn CollectionStore>,
    target: Arc<dyn CollectionStore>,
    lock: Arc<dyn AdvisoryLock>,
    checkpoints: CheckpointStore,
    page_size: usize,
    initial_margin: chrono::Duration,
}

impl FullReindexer {
    pub fn new(
        source: Arc<dyn CollectionStore>,
        target: Arc<dyn CollectionStore>,
        lock: Arc<dyn AdvisoryLock>,
        checkpoints: CheckpointStore,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            source,
            target,
            lock,
            checkpoints,
            page_size: settings.window.max(1),
            initial_margin: settings.initial_margin(),
        }
    }

    /// Acquire the lock, run all three phases, release the lock.
    pub async fn run(&self) -> Result<ReindexOutcome> {
        let span = info_span!("full_reindex");

        async move {
            if !self.lock.try_acquire().await? {
                info!("Lock already held, skipping full reindex");
                metrics::record_lock_contention("full_reindex");
                return Ok(ReindexOutcome::LockHeld);
            }

            let start = Instant::now();
            let result = AssertUnwindSafe(self.run_phases()).catch_unwind().await;

            if let Err(e) = self.lock.release().await {
                error!(error = %e, "Failed to release lock after full reindex");
            }

            match result {
                Ok(Ok(report)) => {
                    metrics::record_reindex("completed", report.updated, report.inserted, start.elapsed());
                    info!(
                        examined = report.examined,
                        updated = report.updated,
                        missing_source = report.missing_source,
                        inserted = report.inserted,
                        checkpoint = %format_checkpoint(&report.checkpoint),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Full reindex complete"
                    );
                    Ok(ReindexOutcome::Completed(report))
                }
                Ok(Err(e)) => {
                    metrics::record_reindex("failed", 0, 0, start.elapsed());
                    metrics::record_error("full_reindex", e.kind());
                    error!(error = %e, "Full reindex failed");
                    Err(e)
                }
                Err(panic) => {
                    metrics::record_reindex("panicked", 0, 0, start.elapsed());
                    std::panic::resume_unwind(panic)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_phases(&self) -> Result<ReindexReport> {
        let mut report = ReindexReport {
            examined: 0,
            updated: 0,
            missing_source: 0,
            inserted: 0,
            checkpoint: Utc::now(),
        };

        // Phase 1
        let mut last_seen = None;
        let mut records = scan(self.target.as_ref(), Filter::All, self.page_size);
        while let Some(record) = records.try_next().await? {
            report.examined += 1;
            match plan_reconcile(self.source.as_ref(), &record).await? {
                ReconcilePlan::MissingSource => {
                    report.missing_source += 1;
                    continue;
                }
                ReconcilePlan::Unchanged => {}
                ReconcilePlan::Update(patch) => {
                    debug!(id = %record.id, fields = ?patch.changed_fields(), "Updating target record");
                    if !self.target.update_one(record.id.clone(), patch).await? {
                        warn!(id = %record.id, "Target record vanished during reindex");
                    }
                    report.updated += 1;
                }
            }
            last_seen = Some(record.created_at);
        }
        drop(records);
        info!(examined = report.examined, updated = report.updated, "Reconciled existing target records");

        // Phase 2
        let mut pointer = match last_seen {
            Some(ts) => ts,
            None => initial_checkpoint(self.source.as_ref(), self.initial_margin).await?,
        };
        loop {
            let batch = self
                .source
                .find(Filter::CreatedAfter(pointer), FindOptions::ascending().limit(self.page_size))
                .await?;
            if batch.is_empty() {
                break;
            }
            for record in &batch {
                self.target.insert_one(anonymize(record)?).await?;
                pointer = record.created_at;
                report.inserted += 1;
            }
        }
        info!(inserted = report.inserted, "Caught up with newest source records");

        // Phase 3
        self.checkpoints.store(pointer).await?;
        metrics::set_checkpoint_timestamp(pointer.timestamp_millis() as f64 / 1000.0);
        report.checkpoint = pointer;

        Ok(report)
    }
}
