//! A swap daemon process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::config::CndConfigFile;
use crate::process::{find_binary, ManagedProcess, ProcessSpec};
use crate::Result;

/// Environment variable overriding the daemon binary.
pub const CND_BIN_ENV: &str = "CND_BIN";

/// Logged once the HTTP API accepts requests.
const READY_MARKER: &str = "Starting HTTP server on";

/// One daemon process with its config file and data directory.
///
/// The data directory survives [`stop`](CndInstance::stop), so a restarted
/// daemon resumes the swaps it knew about.
#[derive(Debug)]
pub struct CndInstance {
    name: String,
    binary: PathBuf,
    config: CndConfigFile,
    config_path: PathBuf,
    log_file: PathBuf,
    startup_timeout: Duration,
    process: Option<ManagedProcess>,
}

impl CndInstance {
    /// Prepare a daemon named `name` with `config`, keeping its config file
    /// and log under `dir`.
    pub fn new(name: impl Into<String>, dir: &Path, config: CndConfigFile) -> Result<Self> {
        Ok(Self::with_binary(
            find_binary("cnd", CND_BIN_ENV)?,
            name,
            dir,
            config,
        ))
    }

    /// Prepare a daemon running `binary`.
    pub fn with_binary(
        binary: impl Into<PathBuf>,
        name: impl Into<String>,
        dir: &Path,
        config: CndConfigFile,
    ) -> Self {
        let name = name.into();
        Self {
            config_path: dir.join(format!("{}.toml", name)),
            log_file: dir.join(format!("cnd-{}.log", name)),
            name,
            config,
            binary: binary.into(),
            startup_timeout: Duration::from_secs(30),
            process: None,
        }
    }

    /// Set how long to wait for the readiness marker.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Configuration the daemon runs with.
    pub fn config(&self) -> &CndConfigFile {
        &self.config
    }

    /// File receiving the daemon's output.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// OS pid, if running.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ManagedProcess::pid)
    }

    /// Whether the daemon is running.
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Write the config file, spawn the daemon and wait until its HTTP API is
    /// up. No-op when already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.config.data.dir)?;
        self.config.write(&self.config_path)?;

        let spec = ProcessSpec::new(format!("cnd-{}", self.name), &self.binary, &self.log_file)
            .arg("--config")
            .arg(self.config_path.display().to_string());
        let mut process = ManagedProcess::spawn(spec)?;
        process
            .wait_for_log_message(READY_MARKER, self.startup_timeout)
            .await?;

        tracing::info!(
            actor = %self.name,
            pid = process.pid(),
            http_api = %self.config.http_api.socket,
            "daemon started"
        );
        self.process = Some(process);
        Ok(())
    }

    /// Stop the daemon. Idempotent and infallible.
    pub async fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.stop().await;
            tracing::info!(actor = %self.name, "daemon stopped");
        }
    }

    /// Stop, then start again with the same data directory.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await;
        self.start().await
    }
}
