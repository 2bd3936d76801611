// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint ("pointer") persistence.
//!
//! Stores the creation timestamp of the last record copied into the target
//! in a single file, as an ISO-8601 string. This survives process restarts;
//! a missing file means "no checkpoint yet".
//!
//! # Atomic Writes
//!
//! `store()` writes the new value to a sibling temp file, syncs it, then
//! renames it over the pointer file. Readers therefore see either the old or
//! the new value, never a torn write. Last write wins; no history is kept.
//!
//! # Checkpoint Semantics
//!
//! The checkpoint is the creation timestamp of the **last successfully
//! flushed** record. Forward sync reads strictly after it:
//!
//! ```text
//! fetch > T → insert into target → persist pointer T'
//!              (crash here = re-fetch, re-insert of the same ids)
//! ```

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Parse the textual content of a pointer file.
///
/// Surrounding whitespace (e.g. a trailing newline added by hand) is ignored.
pub fn parse_checkpoint(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw.trim()).map(|ts| ts.with_timezone(&Utc))
}

/// Render a checkpoint as stored on disk (`2024-03-01T12:00:00.000Z`).
pub fn format_checkpoint(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// File-backed single-value checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the pointer file (for diagnostics).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored checkpoint.
    ///
    /// Returns `None` if the file does not exist.
    pub async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint on disk");
                return Ok(None);
            }
            Err(source) => {
                return Err(ReplicationError::Checkpoint {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let ts = parse_checkpoint(&raw).map_err(|source| ReplicationError::CheckpointParse {
            path: self.path.clone(),
            value: raw.trim().to_string(),
            source,
        })?;

        info!(path = %self.path.display(), checkpoint = %format_checkpoint(&ts), "Loaded checkpoint");
        Ok(Some(ts))
    }

    /// Durably overwrite the stored checkpoint.
    pub async fn store(&self, ts: DateTime<Utc>) -> Result<()> {
        let value = format_checkpoint(&ts);
        let temp_path = self.temp_path();
        let io_err = |source| ReplicationError::Checkpoint {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut file = tokio::fs::File::create(&temp_path).await.map_err(io_err)?;
        file.write_all(value.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path).await.map_err(io_err)?;

        debug!(path = %self.path.display(), checkpoint = %value, "Checkpoint persisted");
        crate::metrics::record_checkpoint_persist(true);
        Ok(())
    }

    /// Temp file in the same directory, so the rename stays on one filesystem.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
    }
}
