// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciler: keeps already-replicated target records in step with the source.
//!
//! Anonymized fields are derived from mutable source fields, so a source edit
//! made after first replication has to be propagated. The reconciler
//! ("updater") streams the whole target, ascending by creation timestamp, and
//! for each record:
//!
//! 1. Stops the pass if the advisory lock is held
//! 2. Looks up the source record by id (skips if it was deleted)
//! 3. Re-anonymizes it and diffs against the target record
//! 4. Writes only the differing fields; identical records cost no write.
//!    The lock is checked again right before the write, since a reindex may
//!    have taken it during the source lookup
//!
//! A pass is a finite stream. [`Reconciler::run`] is the outer loop that
//! starts a fresh pass as soon as the previous one ends, backs off while the
//! lock is held, and backs off exponentially after a failed pass.

use crate::anonymizer::anonymize;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::SyncSettings;
use crate::error::Result;
use crate::lock::AdvisoryLock;
use crate::metrics;
use crate::record::{Customer, RecordPatch};
use crate::resilience::{sleep_or_shutdown, RateLimiter, RetryConfig};
use crate::store::{scan, CollectionStore, Filter};
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What to do with one target record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilePlan {
    /// The source record was deleted. Deletions are not propagated.
    MissingSource,
    /// Target already equals the anonymized source.
    Unchanged,
    /// Target differs; apply this patch.
    Update(RecordPatch),
}

/// Compare a target record against the live source.
pub async fn plan_reconcile(source: &dyn CollectionStore, target: &Customer) -> Result<ReconcilePlan> {
    let Some(current) = source.find_one(Filter::Id(target.id.clone())).await? else {
        return Ok(ReconcilePlan::MissingSource);
    };

    let desired = anonymize(&current)?;
    let patch = target.diff(&desired);
    if patch.is_empty() {
        Ok(ReconcilePlan::Unchanged)
    } else {
        Ok(ReconcilePlan::Update(patch))
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Reached the end of the target.
    Completed,
    /// Lock observed held; the pass was abandoned.
    LockHeld,
    /// Shutdown requested mid-pass.
    Shutdown,
}

impl PassOutcome {
    fn label(&self) -> &'static str {
        match self {
            PassOutcome::Completed => "completed",
            PassOutcome::LockHeld => "lock_held",
            PassOutcome::Shutdown => "shutdown",
        }
    }
}

/// Counts for one pass over the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub examined: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub missing_source: usize,
    pub outcome: PassOutcome,
}

impl PassReport {
    fn new() -> Self {
        Self {
            examined: 0,
            updated: 0,
            unchanged: 0,
            missing_source: 0,
            outcome: PassOutcome::Completed,
        }
    }
}

/// The continuous reconciler.
pub struct Reconciler {
    source: Arc<dyn CollectionStore>,
    target: Arc<dyn CollectionStore>,
    lock: Arc<dyn AdvisoryLock>,
    circuit: Arc<CircuitBreaker>,
    page_size: usize,
    lock_backoff: Duration,
    idle_backoff: Duration,
    retry: RetryConfig,
    rate_limiter: Option<RateLimiter>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn CollectionStore>,
        target: Arc<dyn CollectionStore>,
        lock: Arc<dyn AdvisoryLock>,
        circuit: Arc<CircuitBreaker>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            source,
            target,
            lock,
            circuit,
            page_size: settings.reconcile_page_size.max(1),
            lock_backoff: settings.lock_backoff_duration(),
            idle_backoff: settings.reconcile_idle_backoff_duration(),
            retry: RetryConfig::daemon(),
            rate_limiter: settings.rate_limit_config().map(RateLimiter::new),
        }
    }

    /// Override the backoff schedule used after a failed pass.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// One pass over the whole target.
    pub async fn run_pass(&self, shutdown_rx: &watch::Receiver<bool>) -> Result<PassReport> {
        let mut report = PassReport::new();
        let mut records = scan(self.target.as_ref(), Filter::All, self.page_size);

        while let Some(record) = records.try_next().await? {
            if *shutdown_rx.borrow() {
                report.outcome = PassOutcome::Shutdown;
                return Ok(report);
            }
            if self.lock.is_held().await? {
                report.outcome = PassOutcome::LockHeld;
                return Ok(report);
            }
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire().await;
            }

            report.examined += 1;
            match plan_reconcile(self.source.as_ref(), &record).await? {
                ReconcilePlan::MissingSource => {
                    report.missing_source += 1;
                    metrics::record_reconcile_action("missing_source");
                }
                ReconcilePlan::Unchanged => {
                    report.unchanged += 1;
                    metrics::record_reconcile_action("unchanged");
                }
                ReconcilePlan::Update(patch) => {
                    if self.lock.is_held().await? {
                        report.outcome = PassOutcome::LockHeld;
                        return Ok(report);
                    }
                    let fields = patch.changed_fields();
                    let target = Arc::clone(&self.target);
                    let id = record.id.clone();
                    self.circuit
                        .protect(|| async move { target.update_one(id, patch).await })
                        .await?;
                    report.updated += 1;
                    metrics::record_reconcile_action("updated");
                    debug!(id = %record.id, fields = ?fields, "Updated target record");
                }
            }
        }

        Ok(report)
    }

    /// Run passes back to back until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let span = info_span!("reconciler", page_size = self.page_size);

        async move {
            info!("Starting reconciler");
            let mut attempt = 0usize;

            loop {
                // A closed channel can never signal again.
                if *shutdown_rx.borrow() || shutdown_rx.has_changed().is_err() {
                    break;
                }

                let start = Instant::now();
                let delay = match self.run_pass(&shutdown_rx).await {
                    Ok(report) => {
                        attempt = 0;
                        metrics::record_reconcile_pass(report.outcome.label(), report.examined, start.elapsed());
                        match report.outcome {
                            PassOutcome::Shutdown => break,
                            PassOutcome::LockHeld => {
                                metrics::record_lock_contention("reconciler");
                                debug!(examined = report.examined, "Lock held, pausing reconciliation");
                                Some(self.lock_backoff)
                            }
                            PassOutcome::Completed => {
                                if report.updated > 0 {
                                    info!(
                                        examined = report.examined,
                                        updated = report.updated,
                                        missing_source = report.missing_source,
                                        "Reconciliation pass complete"
                                    );
                                } else {
                                    debug!(examined = report.examined, "Reconciliation pass complete, nothing to update");
                                }
                                (report.examined == 0).then_some(self.idle_backoff)
                            }
                        }
                    }
                    Err(e) => {
                        attempt += 1;
                        metrics::record_reconcile_pass("error", 0, start.elapsed());
                        metrics::record_error("reconciler", e.kind());
                        if !self.retry.should_retry(attempt) {
                            error!(error = %e, attempt, "Reconciler giving up");
                            break;
                        }
                        let delay = self.retry.delay_for_attempt(attempt);
                        if e.is_retryable() {
                            warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Reconciliation pass failed, restarting");
                        } else {
                            error!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Reconciliation pass failed, restarting");
                        }
                        Some(delay)
                    }
                };

                match delay {
                    Some(delay) => {
                        if sleep_or_shutdown(delay, &mut shutdown_rx).await {
                            break;
                        }
                    }
                    None => tokio::task::yield_now().await,
                }
            }

            info!("Reconciler stopped");
        }
        .instrument(span)
        .await;
    }
}
