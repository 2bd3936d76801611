// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Forward sync ticks, buffering and flushes
//! - Checkpoint persistence
//! - Lock state and contention
//! - Reconciliation actions and passes
//! - Full reindex runs
//! - Circuit breaker calls
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! No recorder is installed by this crate; without one, every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use anon_replication_engine::metrics;
//! use std::time::Duration;
//!
//! metrics::record_forward_tick("flushed");
//! metrics::record_forward_flush(250, Duration::from_millis(40));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Forward Sync Metrics
// =============================================================================

/// Record the outcome of one forward-sync tick (`deferred`, `buffered`, `flushed`, `idle`, `error`).
pub fn record_forward_tick(outcome: &str) {
    counter!("replication_forward_ticks_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record source records fetched into the buffer.
pub fn record_forward_buffered(count: usize) {
    counter!("replication_forward_records_buffered_total").increment(count as u64);
}

/// Record a successful flush into the target.
pub fn record_forward_flush(count: usize, duration: Duration) {
    counter!("replication_forward_flushes_total").increment(1);
    counter!("replication_forward_records_flushed_total").increment(count as u64);
    histogram!("replication_forward_flush_duration_seconds").record(duration.as_secs_f64());
    histogram!("replication_forward_batch_size").record(count as f64);
}

/// Record buffered records dropped because the lock was observed held.
pub fn record_forward_buffer_dropped(count: usize) {
    if count > 0 {
        counter!("replication_forward_records_dropped_total").increment(count as u64);
    }
}

// =============================================================================
// Checkpoint Metrics
// =============================================================================

/// Record checkpoint persistence.
pub fn record_checkpoint_persist(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replication_checkpoint_persists_total", "status" => status).increment(1);
}

/// Current checkpoint as unix seconds.
pub fn set_checkpoint_timestamp(unix_seconds: f64) {
    gauge!("replication_checkpoint_timestamp_seconds").set(unix_seconds);
}

// =============================================================================
// Lock Metrics
// =============================================================================

/// Whether this process holds the advisory lock.
pub fn set_lock_held(held: bool) {
    gauge!("replication_lock_held").set(if held { 1.0 } else { 0.0 });
}

/// Record an actor backing off because the lock is held.
pub fn record_lock_contention(actor: &str) {
    counter!("replication_lock_contention_total", "actor" => actor.to_string()).increment(1);
}

// =============================================================================
// Reconciliation Metrics
// =============================================================================

/// Record what happened to one examined target record (`updated`, `unchanged`, `missing_source`).
pub fn record_reconcile_action(action: &str) {
    counter!("replication_reconcile_records_total", "action" => action.to_string()).increment(1);
}

/// Record the end of a reconciliation pass (`completed`, `interrupted`, `error`).
pub fn record_reconcile_pass(outcome: &str, examined: usize, duration: Duration) {
    counter!("replication_reconcile_passes_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("replication_reconcile_pass_records").record(examined as f64);
    histogram!("replication_reconcile_pass_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Full Reindex Metrics
// =============================================================================

/// Record a finished full reindex run.
pub fn record_reindex(outcome: &str, updated: usize, inserted: usize, duration: Duration) {
    counter!("replication_reindex_runs_total", "outcome" => outcome.to_string()).increment(1);
    counter!("replication_reindex_records_updated_total").increment(updated as u64);
    counter!("replication_reindex_records_inserted_total").increment(inserted as u64);
    histogram!("replication_reindex_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Store Metrics
// =============================================================================

/// Record a store retry (SQLITE_BUSY/SQLITE_LOCKED).
pub fn store_retries_total(operation: &str) {
    counter!("replication_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record errors by component and type.
pub fn record_error(component: &str, error_type: &str) {
    counter!(
        "replication_errors_total",
        "component" => component.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        "Failed" => 4.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}

// =============================================================================
// Circuit Breaker Metrics
// =============================================================================

/// Record circuit breaker call outcome.
pub fn record_circuit_call(circuit_name: &str, outcome: &str) {
    counter!(
        "replication_circuit_calls_total",
        "circuit" => circuit_name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
