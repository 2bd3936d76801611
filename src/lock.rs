// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Advisory lock shared by the full reindex and the continuous actors.
//!
//! The lock has no effect on the store itself. Every actor that writes to the
//! target is expected to call [`AdvisoryLock::is_held`] before writing and
//! back off while it returns `true`. Only the full reindex ever acquires it.
//!
//! [`FileLock`] backs the lock with a marker file: its mere existence means
//! "locked". Acquisition uses exclusive create, so two reindex runs cannot
//! both succeed.

use crate::error::{ReplicationError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Boxed future returned by [`AdvisoryLock`] methods.
pub type LockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A cooperative, cross-process mutual exclusion signal.
pub trait AdvisoryLock: Send + Sync + 'static {
    /// Non-blocking check of the current lock state.
    fn is_held(&self) -> LockFuture<'_, bool>;

    /// Try to take the lock. Returns `false` if someone else holds it.
    fn try_acquire(&self) -> LockFuture<'_, bool>;

    /// Release the lock. Releasing a lock that is not held is a no-op.
    fn release(&self) -> LockFuture<'_, ()>;
}

/// Lock backed by a marker file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ReplicationError {
        ReplicationError::Lock {
            path: self.path.clone(),
            source,
        }
    }
}

impl AdvisoryLock for FileLock {
    fn is_held(&self) -> LockFuture<'_, bool> {
        Box::pin(async move {
            tokio::fs::try_exists(&self.path)
                .await
                .map_err(|e| self.io_error(e))
        })
    }

    fn try_acquire(&self) -> LockFuture<'_, bool> {
        Box::pin(async move {
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .await;

            let mut file = match file {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(path = %self.path.display(), "Lock already held");
                    return Ok(false);
                }
                Err(e) => return Err(self.io_error(e)),
            };

            // Holder info is for operators only; existence alone signals "locked".
            let holder = format!(
                "pid={} acquired_at={}\n",
                std::process::id(),
                chrono::Utc::now().to_rfc3339()
            );
            if let Err(e) = file.write_all(holder.as_bytes()).await {
                warn!(path = %self.path.display(), error = %e, "Failed to write lock holder info");
            }

            info!(path = %self.path.display(), "Lock acquired");
            crate::metrics::set_lock_held(true);
            Ok(true)
        })
    }

    fn release(&self) -> LockFuture<'_, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    info!(path = %self.path.display(), "Lock released");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "Lock was not held");
                }
                Err(e) => return Err(self.io_error(e)),
            }
            crate::metrics::set_lock_held(false);
            Ok(())
        })
    }
}


/// Locks with scripted behaviour for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::{AdvisoryLock, LockFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports free for the first `free_checks` calls to `is_held`, held after.
    ///
    /// Models a full reindex taking the lock between an actor's lock check
    /// and its write.
    pub(crate) struct TakenAfter {
        free_checks: usize,
        checks: AtomicUsize,
    }

    impl TakenAfter {
        pub(crate) fn new(free_checks: usize) -> Self {
            Self {
                free_checks,
                checks: AtomicUsize::new(0),
            }
        }

        pub(crate) fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    impl AdvisoryLock for TakenAfter {
        fn is_held(&self) -> LockFuture<'_, bool> {
            let seen = self.checks.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(seen >= self.free_checks) })
        }

        fn try_acquire(&self) -> LockFuture<'_, bool> {
            Box::pin(async { Ok(false) })
        }

        fn release(&self) -> LockFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }
}
