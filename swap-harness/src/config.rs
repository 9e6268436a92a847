//! Harness configuration.
//!
//! # Environment variables
//!
//! ```bash
//! export SWAP_HARNESS_ROOT=/tmp/swap-harness        # locks, logs, node data
//! export SWAP_HARNESS_LEDGERS=bitcoin,ethereum      # ledgers to start
//! export SWAP_HARNESS_ACTION_TIMEOUT_SECS=20
//! export SWAP_HARNESS_EVENT_TIMEOUT_SECS=30
//! export BITCOIND_BIN=/opt/bitcoin/bin/bitcoind     # binary overrides
//! export GETH_BIN=/opt/geth/geth
//! export LND_BIN=/opt/lnd/lnd
//! export CND_BIN=/opt/comit/cnd
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::daemon::CND_BIN_ENV;
use crate::environment::LedgerSelection;
use crate::ledgers::bitcoind::BITCOIND_BIN_ENV;
use crate::ledgers::geth::GETH_BIN_ENV;
use crate::ledgers::lnd::LND_BIN_ENV;
use crate::polling::PollingConfig;
use crate::process::find_binary;
use crate::{HarnessError, Result};

/// Root directory variable.
pub const ROOT_ENV: &str = "SWAP_HARNESS_ROOT";
/// Ledger selection variable.
pub const LEDGERS_ENV: &str = "SWAP_HARNESS_LEDGERS";
/// Action discovery timeout variable, in seconds.
pub const ACTION_TIMEOUT_ENV: &str = "SWAP_HARNESS_ACTION_TIMEOUT_SECS";
/// Event acknowledgement timeout variable, in seconds.
pub const EVENT_TIMEOUT_ENV: &str = "SWAP_HARNESS_EVENT_TIMEOUT_SECS";

/// Explicit paths for node and daemon binaries. Unset entries are looked
/// up on `PATH`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryPaths {
    /// bitcoind
    pub bitcoind: Option<PathBuf>,
    /// geth
    pub geth: Option<PathBuf>,
    /// lnd
    pub lnd: Option<PathBuf>,
    /// The swap daemon.
    pub cnd: Option<PathBuf>,
}

impl BinaryPaths {
    /// bitcoind binary.
    pub fn bitcoind(&self) -> Result<PathBuf> {
        resolve(&self.bitcoind, "bitcoind", BITCOIND_BIN_ENV)
    }

    /// geth binary.
    pub fn geth(&self) -> Result<PathBuf> {
        resolve(&self.geth, "geth", GETH_BIN_ENV)
    }

    /// lnd binary.
    pub fn lnd(&self) -> Result<PathBuf> {
        resolve(&self.lnd, "lnd", LND_BIN_ENV)
    }

    /// Daemon binary.
    pub fn cnd(&self) -> Result<PathBuf> {
        resolve(&self.cnd, "cnd", CND_BIN_ENV)
    }
}

fn resolve(explicit: &Option<PathBuf>, program: &str, env_var: &str) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.clone()),
        None => find_binary(program, env_var),
    }
}

/// Configuration of one harness run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Holds `locks/`, `log/` and node data directories.
    pub root: PathBuf,
    /// Ledgers to start.
    pub ledgers: LedgerSelection,
    /// Binary overrides.
    pub binaries: BinaryPaths,
    /// Action and event polling bounds.
    pub polling: PollingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("swap-harness"),
            ledgers: LedgerSelection::all(),
            binaries: BinaryPaths::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Configuration rooted at `root` with defaults otherwise.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from variables provided by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = HarnessConfigOverrides {
            root: lookup(ROOT_ENV).map(PathBuf::from),
            bitcoind_bin: lookup(BITCOIND_BIN_ENV).map(PathBuf::from),
            geth_bin: lookup(GETH_BIN_ENV).map(PathBuf::from),
            lnd_bin: lookup(LND_BIN_ENV).map(PathBuf::from),
            cnd_bin: lookup(CND_BIN_ENV).map(PathBuf::from),
            ..Default::default()
        };

        if let Some(secs) = lookup(ACTION_TIMEOUT_ENV) {
            overrides.action_timeout = Some(parse_secs(ACTION_TIMEOUT_ENV, &secs)?);
        }
        if let Some(secs) = lookup(EVENT_TIMEOUT_ENV) {
            overrides.event_timeout = Some(parse_secs(EVENT_TIMEOUT_ENV, &secs)?);
        }
        if let Some(ledgers) = lookup(LEDGERS_ENV) {
            overrides.ledgers = Some(LedgerSelection::parse(&ledgers)?);
        }

        Ok(Self::default().merge(&overrides))
    }

    /// Apply every set field of `overrides`.
    pub fn merge(mut self, overrides: &HarnessConfigOverrides) -> Self {
        if let Some(root) = &overrides.root {
            self.root = root.clone();
        }
        if let Some(ledgers) = overrides.ledgers {
            self.ledgers = ledgers;
        }
        if let Some(path) = &overrides.bitcoind_bin {
            self.binaries.bitcoind = Some(path.clone());
        }
        if let Some(path) = &overrides.geth_bin {
            self.binaries.geth = Some(path.clone());
        }
        if let Some(path) = &overrides.lnd_bin {
            self.binaries.lnd = Some(path.clone());
        }
        if let Some(path) = &overrides.cnd_bin {
            self.binaries.cnd = Some(path.clone());
        }
        if let Some(timeout) = overrides.action_timeout {
            self.polling.action_timeout = timeout;
        }
        if let Some(timeout) = overrides.event_timeout {
            self.polling.event_timeout = timeout;
        }
        self
    }

    /// Set the ledgers to start.
    pub fn with_ledgers(mut self, ledgers: LedgerSelection) -> Self {
        self.ledgers = ledgers;
        self
    }

    /// Set the polling bounds.
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Lock directories of shared ledgers.
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Log and data directories of nodes and daemons.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    /// Data directory of the node or daemon `name`.
    pub fn node_dir(&self, name: &str) -> PathBuf {
        self.log_dir().join(name)
    }

    /// Lock directory of the ledger `name`.
    pub fn lock_dir(&self, name: &str) -> PathBuf {
        self.locks_dir().join(name)
    }
}

/// Optional overrides of [`HarnessConfig`], applied by
/// [`HarnessConfig::merge`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HarnessConfigOverrides {
    /// Root directory.
    pub root: Option<PathBuf>,
    /// Ledgers to start.
    pub ledgers: Option<LedgerSelection>,
    /// bitcoind binary.
    pub bitcoind_bin: Option<PathBuf>,
    /// geth binary.
    pub geth_bin: Option<PathBuf>,
    /// lnd binary.
    pub lnd_bin: Option<PathBuf>,
    /// Daemon binary.
    pub cnd_bin: Option<PathBuf>,
    /// Action discovery timeout.
    pub action_timeout: Option<Duration>,
    /// Event acknowledgement timeout.
    pub event_timeout: Option<Duration>,
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| HarnessError::invalid_data(name, format!("{:?}: {}", value, e)))
}
