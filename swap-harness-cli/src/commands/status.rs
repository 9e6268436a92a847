//! Status command - show persisted ledgers

use anyhow::Result;
use std::path::Path;
use swap_harness::config::HarnessConfig;
use swap_harness::environment::ledger_lock_dirs;
use swap_harness::ledgers::lifecycle::{CONFIG_FILE_NAME, PID_FILE_NAME};
use swap_harness::process::{is_pid_alive, read_pid_file};

use crate::ui::{self, LedgerState};

/// What a ledger lock directory says about its node.
#[derive(Debug)]
pub struct LedgerStatus {
    pub name: String,
    pub pid: Option<u32>,
    pub alive: bool,
    pub config: Option<serde_json::Value>,
}

pub async fn run(config: &HarnessConfig, verbose: bool) -> Result<()> {
    let locks_dir = config.locks_dir();
    ui::banner("Ledger Status", "Locks", &locks_dir);

    let statuses = collect(&locks_dir);
    if statuses.is_empty() {
        ui::info("No ledgers running");
        return Ok(());
    }

    for status in &statuses {
        let state = match (status.pid, status.alive) {
            (Some(pid), true) => LedgerState::Running(pid),
            (Some(pid), false) => LedgerState::Stale(pid),
            (None, _) => LedgerState::MissingPid,
        };
        ui::ledger(&status.name, state);

        if let Some(config) = &status.config {
            ui::ledger_config(config, verbose);
        }
    }

    if statuses.iter().any(|s| !s.alive) {
        ui::info("Run `swap-harness stop` to clear stale ledgers");
    }

    Ok(())
}

/// Read every ledger lock directory under `locks_dir`.
pub fn collect(locks_dir: &Path) -> Vec<LedgerStatus> {
    ledger_lock_dirs(locks_dir)
        .into_iter()
        .map(|dir| {
            let name = dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pid = read_pid_file(&dir.join(PID_FILE_NAME)).ok().flatten();
            let config = std::fs::read_to_string(dir.join(CONFIG_FILE_NAME))
                .ok()
                .and_then(|content| serde_json::from_str(&content).ok());

            LedgerStatus {
                name,
                pid,
                alive: pid.is_some_and(is_pid_alive),
                config,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_empty() {
        let dir = TempDir::new().unwrap();
        assert!(collect(dir.path()).is_empty());
        assert!(collect(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_collect_reports_live_and_stale() {
        let dir = TempDir::new().unwrap();

        let live = dir.path().join("geth");
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join(PID_FILE_NAME), std::process::id().to_string()).unwrap();
        std::fs::write(live.join(CONFIG_FILE_NAME), r#"{"rpc_url":"http://127.0.0.1:8545"}"#)
            .unwrap();

        let stale = dir.path().join("bitcoind");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join(CONFIG_FILE_NAME), "{}").unwrap();

        let mut statuses = collect(dir.path());
        statuses.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "bitcoind");
        assert_eq!(statuses[0].pid, None);
        assert!(!statuses[0].alive);

        assert_eq!(statuses[1].name, "geth");
        assert_eq!(statuses[1].pid, Some(std::process::id()));
        assert!(statuses[1].alive);
        assert_eq!(
            statuses[1].config.as_ref().unwrap()["rpc_url"],
            "http://127.0.0.1:8545"
        );
    }
}
