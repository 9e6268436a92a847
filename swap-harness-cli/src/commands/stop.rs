//! Stop command - kill every recorded ledger

use anyhow::Result;
use swap_harness::config::HarnessConfig;
use swap_harness::environment::Environment;

use crate::ui::{self, LedgerState};

pub async fn run(config: &HarnessConfig, verbose: bool) -> Result<()> {
    let locks_dir = config.locks_dir();
    ui::banner("Stopping Ledgers", "Locks", &locks_dir);

    if verbose {
        tracing::debug!(locks = %locks_dir.display(), "cleaning up");
    }

    let killed = Environment::cleanup(&locks_dir);
    if killed.is_empty() {
        ui::info("No ledgers recorded");
        return Ok(());
    }

    for (dir, pid) in &killed {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let state = match pid {
            Some(pid) => LedgerState::Stopped(*pid),
            None => LedgerState::Forgotten,
        };
        ui::ledger(&name, state);
    }

    Ok(())
}
