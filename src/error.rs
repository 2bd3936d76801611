// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication engine.
//!
//! Errors are categorized by their source (store, checkpoint file, lock file,
//! configuration) and carry enough context to debug a failed tick or pass.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Store` | Yes | Query/write failure against a collection |
//! | `Checkpoint` | Yes | I/O failure reading or writing the pointer file |
//! | `Lock` | Yes | I/O failure on the lock marker file |
//! | `CircuitOpen` | Yes | Target writes are being shed by the circuit breaker |
//! | `CheckpointParse` | No | Pointer file holds something that is not a timestamp |
//! | `Config` | No | Configuration invalid or missing |
//! | `MalformedRecord` | No | Source record violates an anonymizer precondition |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! The continuous actors never give up: a retryable error fails the current
//! tick or pass and is retried on the next one. Non-retryable errors are
//! logged at `error` so an operator notices that retrying will not help.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Store query or write error.
    ///
    /// Occurs when reading the source or writing the target collection.
    /// Transient by assumption: the failed tick/pass is retried.
    #[error("Store error ({operation}): {message}")]
    Store {
        operation: String,
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Pointer file could not be read or written.
    #[error("Checkpoint error ({}): {source}", path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pointer file exists but does not hold an ISO-8601 timestamp.
    ///
    /// Not retryable - the file has to be fixed or removed by an operator.
    #[error("Checkpoint file {} holds an invalid timestamp {value:?}", path.display())]
    CheckpointParse {
        path: PathBuf,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Lock marker file could not be created, inspected or removed.
    #[error("Lock error ({}): {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or missing configuration.
    ///
    /// Occurs during startup. Not retryable - fix the environment and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source record violates an anonymizer precondition (e.g. email without `@`).
    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    /// Target writes rejected because the circuit breaker is open.
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    /// Engine state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a store error from a sqlx error.
    pub fn store(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Store {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a store error without source
    pub fn store_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { .. } => true,
            Self::Checkpoint { .. } => true,
            Self::Lock { .. } => true,
            Self::CircuitOpen(_) => true,
            Self::CheckpointParse { .. } => false, // Needs an operator
            Self::Config(_) => false,
            Self::MalformedRecord { .. } => false, // Bad data at the source
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::Checkpoint { .. } => "checkpoint",
            Self::CheckpointParse { .. } => "checkpoint_parse",
            Self::Lock { .. } => "lock",
            Self::Config(_) => "config",
            Self::MalformedRecord { .. } => "malformed_record",
            Self::CircuitOpen(_) => "circuit_open",
            Self::InvalidState { .. } => "invalid_state",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for ReplicationError {
    fn from(e: sqlx::Error) -> Self {
        Self::store("unknown", e)
    }
}
