//! Cross-process mutual exclusion over lock files.
//!
//! Test workers run as independent processes that race to initialize the same
//! ledger. [`LockedResource`] serializes them with an exclusive `flock` on a
//! file inside the contended directory, retrying with exponential backoff so a
//! slow-starting node does not make the other workers fail fast.
//!
//! Every attempt is a non-blocking `try_lock_exclusive`. `flock` locks belong
//! to the open file description, so two tasks of the same process that open
//! the lock file separately contend exactly like two processes do.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{HarnessError, Result};

/// Name of the lock file created inside a locked directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Retry schedule for lock acquisition.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub factor: u32,
}

impl RetryPolicy {
    /// Schedule for shared ledger initialization: 10 retries, 200ms up to 8s.
    pub fn ledger() -> Self {
        Self {
            retries: 10,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(8),
            factor: 2,
        }
    }

    /// Schedule for per-account transaction locks: 10 retries, 50ms up to 2s.
    pub fn account() -> Self {
        Self {
            retries: 10,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            factor: 2,
        }
    }

    /// Set the number of retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay bounds.
    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay to sleep after the given failed attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1).saturating_pow(attempt);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Total number of attempts, including the first one.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ledger()
    }
}

/// Entry point for acquiring lock files.
pub struct LockedResource;

impl LockedResource {
    /// Lock a directory, creating it if needed.
    pub async fn acquire(dir: &Path, policy: &RetryPolicy) -> Result<LockGuard> {
        std::fs::create_dir_all(dir)?;
        Self::acquire_file(&dir.join(LOCK_FILE_NAME), policy).await
    }

    /// Lock an arbitrary file, creating it and its parent directory if needed.
    pub async fn acquire_file(path: &Path, policy: &RetryPolicy) -> Result<LockGuard> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        for attempt in 0..policy.attempts() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), attempt, "lock acquired");
                    return Ok(LockGuard {
                        file: Some(file),
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    if attempt + 1 < policy.attempts() {
                        let delay = policy.delay_for(attempt);
                        tracing::debug!(
                            path = %path.display(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "lock busy, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(HarnessError::LockExhausted {
            path: path.to_path_buf(),
            attempts: policy.attempts(),
        })
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Held lock; released on [`LockGuard::release`] or drop.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl LockGuard {
    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly, surfacing unlock failures.
    pub fn release(mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                FileExt::unlock(&file)?;
                tracing::debug!(path = %self.path.display(), "lock released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }
}
