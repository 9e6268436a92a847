//! Child process management for ledger nodes and the swap daemon.
//!
//! Processes are spawned in their own process group with stdout/stderr going
//! to a log file. Readiness is detected by tailing a log for a marker string;
//! shutdown signals the whole group and never fails.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::net::TcpListener;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::{HarnessError, Result};

/// Interval between two looks at a log file.
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Grace period between SIGTERM and SIGKILL.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Number of log lines attached to "exited early" errors.
const LOG_TAIL_LINES: usize = 20;

/// Everything needed to spawn a process.
#[derive(Clone, Debug)]
pub struct ProcessSpec {
    /// Short name used in logs and errors.
    pub program: String,
    /// Resolved binary path.
    pub binary: PathBuf,
    /// Command line arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// File receiving stdout and stderr.
    pub log_file: PathBuf,
}

impl ProcessSpec {
    /// Create a spec for `binary`, logging to `log_file`.
    pub fn new(
        program: impl Into<String>,
        binary: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            binary: binary.into(),
            args: Vec::new(),
            cwd: None,
            log_file: log_file.into(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// A spawned process that is stopped when dropped.
#[derive(Debug)]
pub struct ManagedProcess {
    program: String,
    pid: u32,
    log_file: PathBuf,
    child: Option<Child>,
    stdout_log: LogWatcher,
}

impl ManagedProcess {
    /// Spawn the process described by `spec`.
    pub fn spawn(spec: ProcessSpec) -> Result<Self> {
        if let Some(parent) = spec.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout_log = LogWatcher::from_end(&spec.log_file);

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_file)?;
        let stderr = log.try_clone()?;

        let mut command = Command::new(&spec.binary);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .process_group(0);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|e| HarnessError::ProcessSpawn {
            program: spec.program.clone(),
            reason: format!("{}: {}", spec.binary.display(), e),
        })?;
        let pid = child.id();

        tracing::info!(program = %spec.program, pid, binary = %spec.binary.display(), "process spawned");

        Ok(Self {
            program: spec.program,
            pid,
            log_file: spec.log_file,
            child: Some(child),
            stdout_log,
        })
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// File receiving stdout/stderr.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Returns an error if the process already exited.
    pub fn ensure_running(&mut self) -> Result<()> {
        let exited = match self.child.as_mut() {
            Some(child) => child.try_wait()?,
            None => {
                return Err(HarnessError::ProcessExited {
                    program: self.program.clone(),
                    status: "stopped".to_string(),
                    log_tail: String::new(),
                })
            }
        };

        match exited {
            None => Ok(()),
            Some(status) => {
                self.child = None;
                Err(HarnessError::ProcessExited {
                    program: self.program.clone(),
                    status: status.to_string(),
                    log_tail: tail_lines(&self.log_file, LOG_TAIL_LINES),
                })
            }
        }
    }

    /// Wait until the process writes `marker` to its stdout/stderr log.
    pub async fn wait_for_log_message(&mut self, marker: &str, timeout: Duration) -> Result<()> {
        let mut watcher = self.stdout_log.clone();
        watcher.wait_for(self, marker, timeout).await?;
        self.stdout_log = watcher;
        Ok(())
    }

    /// Send SIGTERM to the process group, escalating to SIGKILL after a grace
    /// period. Idempotent and infallible.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if !signal_group(self.pid, Signal::SIGTERM) {
            self.reap(child).await;
            return;
        }

        let deadline = Instant::now() + STOP_GRACE_PERIOD;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(program = %self.program, pid = self.pid, %status, "process stopped");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(program = %self.program, pid = self.pid, error = %e, "failed to poll process");
                    break;
                }
            }
        }

        tracing::warn!(program = %self.program, pid = self.pid, "process ignored SIGTERM, killing");
        signal_group(self.pid, Signal::SIGKILL);
        self.reap(child).await;
    }

    /// Wait for a signalled child off the async runtime.
    async fn reap(&self, mut child: Child) {
        match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(program = %self.program, pid = self.pid, %status, "process stopped");
            }
            Ok(Err(e)) => {
                tracing::warn!(program = %self.program, pid = self.pid, error = %e, "failed to reap process");
            }
            Err(e) => {
                tracing::warn!(program = %self.program, pid = self.pid, error = %e, "reaper task failed");
            }
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if signal_group(self.pid, Signal::SIGKILL) {
                if let Err(e) = child.wait() {
                    tracing::warn!(program = %self.program, pid = self.pid, error = %e, "failed to reap process");
                }
            }
        }
    }
}

/// Signal a process group. Returns false if the group no longer exists.
fn signal_group(pid: u32, sig: Signal) -> bool {
    match signal::killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) => true,
        Err(nix::Error::ESRCH) => false,
        Err(e) => {
            tracing::warn!(pid, signal = ?sig, error = %e, "failed to signal process group");
            false
        }
    }
}

/// Incremental reader looking for marker strings in a growing log file.
#[derive(Clone, Debug)]
pub struct LogWatcher {
    path: PathBuf,
    offset: u64,
}

impl LogWatcher {
    /// Watch `path`, ignoring everything already written to it.
    ///
    /// Data directories survive across runs, so old readiness markers must not
    /// count. Create the watcher before spawning the process that writes.
    pub fn from_end(path: &Path) -> Self {
        let offset = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self {
            path: path.to_path_buf(),
            offset,
        }
    }

    /// Watch `path` from its first byte.
    pub fn from_start(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
        }
    }

    /// Wait for `marker`, failing early if `process` exits first.
    pub async fn wait_for(
        &mut self,
        process: &mut ManagedProcess,
        marker: &str,
        timeout: Duration,
    ) -> Result<()> {
        tracing::debug!(program = %process.program(), marker, log = %self.path.display(), "waiting for log message");
        let deadline = Instant::now() + timeout;

        loop {
            if self.scan(marker)? {
                tracing::debug!(program = %process.program(), marker, "log message found");
                return Ok(());
            }
            process.ensure_running()?;

            if Instant::now() >= deadline {
                return Err(HarnessError::ReadinessTimeout {
                    program: process.program().to_string(),
                    marker: marker.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(LOG_POLL_INTERVAL).await;
        }
    }

    /// Read new bytes and look for `marker`, advancing past a match.
    pub fn scan(&mut self, marker: &str) -> Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            // truncated or rotated
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let needle = marker.as_bytes();
        if needle.is_empty() {
            return Ok(true);
        }

        match buf.windows(needle.len()).position(|w| w == needle) {
            Some(pos) => {
                self.offset += (pos + needle.len()) as u64;
                Ok(true)
            }
            None => {
                // keep a partial marker at the end of the buffer in view
                let keep = needle.len().saturating_sub(1);
                self.offset += buf.len().saturating_sub(keep) as u64;
                Ok(false)
            }
        }
    }
}

/// Wait until `path` exists.
pub async fn wait_until_file_exists(path: &Path, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !path.exists() {
        if Instant::now() >= deadline {
            return Err(HarnessError::timeout(
                format!("waiting for {}", path.display()),
                timeout,
            ));
        }
        tokio::time::sleep(LOG_POLL_INTERVAL).await;
    }
    Ok(())
}

/// Locate a binary: the override in `env_var` wins, then `PATH`.
pub fn find_binary(program: &str, env_var: &str) -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(env_var) {
        let path = PathBuf::from(path);
        tracing::info!(program, env_var, path = %path.display(), "using binary override");
        if path.is_file() {
            return Ok(path);
        }
        return Err(HarnessError::BinaryNotFound {
            program: format!("{} ({})", program, path.display()),
            env_var: env_var.to_string(),
        });
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(program))
                .find(|candidate| candidate.is_file())
        })
        .ok_or_else(|| HarnessError::BinaryNotFound {
            program: program.to_string(),
            env_var: env_var.to_string(),
        })
}

/// Pick a local TCP port, preferring `preferred` when it is free.
pub fn free_port(preferred: Option<u16>) -> Result<u16> {
    if let Some(port) = preferred {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| HarnessError::PortUnavailable(e.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|e| HarnessError::PortUnavailable(e.to_string()))?
        .port();
    Ok(port)
}

/// Record a pid next to a persisted config.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pid.to_string())?;
    Ok(())
}

/// Read a pid file, `None` if it does not exist.
pub fn read_pid_file(path: &Path) -> Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| HarnessError::CorruptConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether a process with this pid exists.
pub fn is_pid_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // exists but belongs to someone else
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

/// Best-effort SIGTERM to a process recorded in a pid file. Returns the pid
/// that was signalled.
pub fn kill_pid_file(path: &Path) -> Option<u32> {
    let pid = match read_pid_file(path) {
        Ok(Some(pid)) => pid,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable pid file");
            return None;
        }
    };

    // nodes run in their own group; fall back to the single pid
    if !signal_group(pid, Signal::SIGTERM) {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "process already gone");
            return None;
        }
    }
    tracing::info!(pid, path = %path.display(), "terminated recorded process");
    Some(pid)
}

/// Last `lines` lines of a file, empty if unreadable.
pub fn tail_lines(path: &Path, lines: usize) -> String {
    let content = std::fs::read(path).unwrap_or_default();
    let content = String::from_utf8_lossy(&content);
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scan_ignores_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        std::fs::write(&path, "init message: Done loading\n").unwrap();

        let mut watcher = LogWatcher::from_end(&path);
        assert!(!watcher.scan("Done loading").unwrap());

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "2020-01-01 init message: Done loading").unwrap();
        assert!(watcher.scan("Done loading").unwrap());
        assert!(!watcher.scan("Done loading").unwrap());
    }

    #[test]
    fn test_scan_finds_marker_split_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lnd.log");
        let mut watcher = LogWatcher::from_start(&path);
        assert!(!watcher.scan("RPC server listening").unwrap());

        let mut file = File::create(&path).unwrap();
        write!(file, "[INF] RPCS: RPC ser").unwrap();
        assert!(!watcher.scan("RPC server listening").unwrap());
        writeln!(file, "ver listening on 127.0.0.1:10009").unwrap();
        assert!(watcher.scan("RPC server listening").unwrap());
    }

    #[test]
    fn test_find_binary_reports_env_var() {
        let err = find_binary("definitely-not-a-real-node-binary", "SWAP_HARNESS_TEST_UNSET_BIN")
            .unwrap_err();
        match err {
            HarnessError::BinaryNotFound { env_var, .. } => {
                assert_eq!(env_var, "SWAP_HARNESS_TEST_UNSET_BIN")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_free_port_falls_back_when_taken() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let picked = free_port(Some(port)).unwrap();
        assert_ne!(picked, port);
    }

    #[test]
    fn test_pid_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");
        assert_eq!(read_pid_file(&path).unwrap(), None);

        write_pid_file(&path, std::process::id()).unwrap();
        let pid = read_pid_file(&path).unwrap().unwrap();
        assert!(is_pid_alive(pid));

        std::fs::write(&path, "not a pid").unwrap();
        assert!(read_pid_file(&path).is_err());
    }

    #[tokio::test]
    async fn test_wait_reports_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ProcessSpec::new("sh", "/bin/sh", dir.path().join("sh.log"))
            .arg("-c")
            .arg("echo starting; exit 3");
        let mut process = ManagedProcess::spawn(spec).unwrap();

        let err = process
            .wait_for_log_message("never printed", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            HarnessError::ProcessExited { log_tail, .. } => assert!(log_tail.contains("starting")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ProcessSpec::new("sleep", "/bin/sh", dir.path().join("sleep.log"))
            .arg("-c")
            .arg("echo ready; exec sleep 30");
        let mut process = ManagedProcess::spawn(spec).unwrap();
        process
            .wait_for_log_message("ready", Duration::from_secs(5))
            .await
            .unwrap();

        let pid = process.pid();
        process.stop().await;
        process.stop().await;
        assert!(!is_pid_alive(pid));
    }

    #[tokio::test]
    async fn test_stop_kills_and_reaps_process_ignoring_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ProcessSpec::new("stubborn", "/bin/sh", dir.path().join("stubborn.log"))
            .arg("-c")
            .arg("trap '' TERM; echo ready; while true; do sleep 1; done");
        let mut process = ManagedProcess::spawn(spec).unwrap();
        process
            .wait_for_log_message("ready", Duration::from_secs(5))
            .await
            .unwrap();
        let pid = process.pid();

        let ticks = std::sync::atomic::AtomicU32::new(0);
        let ticker = async {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        };
        tokio::select! {
            _ = process.stop() => {}
            _ = ticker => unreachable!(),
        }

        // the runtime kept running while stop waited out the grace period
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
        // reaped, so no zombie keeps the pid alive
        assert!(!is_pid_alive(pid));
    }
}
