//! Lock-coordinated start-or-reuse of ledger instances.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::LedgerInstance;
use crate::lock::{LockedResource, RetryPolicy};
use crate::process::{is_pid_alive, read_pid_file, write_pid_file};
use crate::{HarnessError, Result};

/// Persisted connection parameters inside a lock directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Pid of the process that owns a lock directory's ledger.
pub const PID_FILE_NAME: &str = "pid";

/// Starts ledger instances at most once per lock directory.
#[derive(Clone, Debug, Default)]
pub struct LedgerLifecycleManager {
    policy: RetryPolicy,
}

impl LedgerLifecycleManager {
    /// Create a manager with the given lock retry schedule.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Start the instance built by `factory`, or reuse the one already
    /// described in `lock_dir`.
    ///
    /// The lock is held for the whole check-start-persist sequence and is
    /// released on every path.
    pub async fn start<I, F>(&self, lock_dir: &Path, factory: F) -> Result<LedgerHandle<I>>
    where
        I: LedgerInstance,
        F: FnOnce() -> Result<I>,
    {
        let guard = LockedResource::acquire(lock_dir, &self.policy).await?;
        let result = self.start_locked(lock_dir, factory).await;
        if let Err(e) = guard.release() {
            tracing::warn!(lock_dir = %lock_dir.display(), error = %e, "failed to release ledger lock");
        }
        result
    }

    async fn start_locked<I, F>(&self, lock_dir: &Path, factory: F) -> Result<LedgerHandle<I>>
    where
        I: LedgerInstance,
        F: FnOnce() -> Result<I>,
    {
        let config_path = lock_dir.join(CONFIG_FILE_NAME);

        let persisted = match read_persisted_config::<I::Config>(lock_dir) {
            Err(HarnessError::StaleLedger { path, pid }) => {
                tracing::warn!(
                    config = %path.display(),
                    pid,
                    "recorded ledger process is gone, reclaiming lock directory"
                );
                remove_ledger_files(lock_dir);
                None
            }
            other => other?,
        };

        if let Some(config) = persisted {
            tracing::info!(
                config = %config_path.display(),
                "found config file, using it instead of starting another instance"
            );
            return Ok(LedgerHandle {
                config,
                instance: None,
                lock_dir: lock_dir.to_path_buf(),
            });
        }

        let mut instance = factory()?;
        tracing::info!(ledger = instance.name(), "no config file found, starting new instance");

        match bring_up(&mut instance, lock_dir).await {
            Ok(config) => {
                tracing::info!(ledger = instance.name(), config = %config_path.display(), "config file written");
                Ok(LedgerHandle {
                    config,
                    instance: Some(instance),
                    lock_dir: lock_dir.to_path_buf(),
                })
            }
            Err(e) => {
                tracing::warn!(ledger = instance.name(), error = %e, "ledger failed to start, stopping it");
                instance.stop().await;
                Err(e)
            }
        }
    }
}

async fn bring_up<I: LedgerInstance>(instance: &mut I, lock_dir: &Path) -> Result<I::Config> {
    instance.start().await?;
    let config = instance.warm_up().await?;

    if let Some(pid) = instance.pid() {
        write_pid_file(&lock_dir.join(PID_FILE_NAME), pid)?;
    }
    write_config_atomically(&lock_dir.join(CONFIG_FILE_NAME), &config)?;
    Ok(config)
}

/// Read the config persisted in `lock_dir`.
///
/// A config that does not parse is [`HarnessError::CorruptConfig`]. One whose
/// recorded process is gone is [`HarnessError::StaleLedger`]; the manager
/// reclaims such a directory while holding its lock.
pub fn read_persisted_config<C: DeserializeOwned>(lock_dir: &Path) -> Result<Option<C>> {
    let path = lock_dir.join(CONFIG_FILE_NAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let config = serde_json::from_str(&content).map_err(|e| HarnessError::CorruptConfig {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    if let Some(pid) = read_pid_file(&lock_dir.join(PID_FILE_NAME))? {
        if !is_pid_alive(pid) {
            return Err(HarnessError::StaleLedger { path, pid });
        }
    }

    Ok(Some(config))
}

fn remove_ledger_files(lock_dir: &Path) {
    for file in [CONFIG_FILE_NAME, PID_FILE_NAME] {
        let path = lock_dir.join(file);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove ledger file");
            }
        }
    }
}

fn write_config_atomically<C: Serialize>(path: &Path, config: &C) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(config)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// A started or reused ledger.
///
/// Reused handles are no-op proxies: stopping them leaves the node running for
/// whoever owns it. Dropping an owning handle without [`stop`](Self::stop)
/// still forgets the persisted config; the instance's own drop kills the node.
pub struct LedgerHandle<I: LedgerInstance> {
    config: I::Config,
    instance: Option<I>,
    lock_dir: PathBuf,
}

impl<I: LedgerInstance> LedgerHandle<I> {
    /// Connection parameters.
    pub fn config(&self) -> &I::Config {
        &self.config
    }

    /// Whether this handle started the node.
    pub fn is_owner(&self) -> bool {
        self.instance.is_some()
    }

    /// Lock directory the config lives in.
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Pid of the node, if this handle owns it.
    pub fn pid(&self) -> Option<u32> {
        self.instance.as_ref().and_then(|i| i.pid())
    }

    /// Stop the node if owned and forget the persisted config. Never fails.
    pub async fn stop(&mut self) {
        let Some(mut instance) = self.instance.take() else {
            return;
        };
        instance.stop().await;
        remove_ledger_files(&self.lock_dir);
    }
}

impl<I: LedgerInstance> Drop for LedgerHandle<I> {
    fn drop(&mut self) {
        if let Some(instance) = &self.instance {
            tracing::debug!(ledger = instance.name(), "owning handle dropped without stop");
            remove_ledger_files(&self.lock_dir);
        }
    }
}
