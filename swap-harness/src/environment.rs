//! The ledgers, wallets and actors of one test run.
//!
//! ```text
//! Environment::start
//! ├── geth                          (in parallel with)
//! └── bitcoind ──┬── lnd-alice
//!                └── lnd-bob
//! ```
//!
//! Ledgers go through the [`LedgerLifecycleManager`], so environments started
//! by concurrent test workers share one node per ledger.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::actor::{Actor, ActorName, ActorRegistry, SwapFactory};
use crate::asset::Asset;
use crate::config::HarnessConfig;
use crate::daemon::{CndConfigFile, CndConfigOverrides, CndInstance};
use crate::ledgers::lifecycle::{CONFIG_FILE_NAME, PID_FILE_NAME};
use crate::ledgers::{
    BitcoinNodeConfig, BitcoindInstance, EthereumNodeConfig, GethInstance, LedgerConfigs,
    LedgerHandle, LedgerLifecycleManager, LightningNodeConfig, LndInstance,
};
use crate::lock::RetryPolicy;
use crate::polling::ActionPollingEngine;
use crate::process::{free_port, kill_pid_file};
use crate::wallets::{
    BitcoinFaucet, BitcoindWallet, EthereumFaucet, EthereumWallet, LightningWallet,
    TransactionLocks, Wallet, Wallets,
};
use crate::{HarnessError, Result};

/// Capacity of each channel opened by [`Environment::setup_lightning_channels`].
pub const DEFAULT_CHANNEL_CAPACITY: u128 = 15_000_000;

/// Lock directory names.
pub const BITCOIND_LOCK: &str = "bitcoind";
/// geth lock directory.
pub const GETH_LOCK: &str = "geth";
/// Alice's lnd lock directory.
pub const LND_ALICE_LOCK: &str = "lnd-alice";
/// Bob's lnd lock directory.
pub const LND_BOB_LOCK: &str = "lnd-bob";
/// Per-account transaction locks.
pub const ACCOUNTS_LOCK: &str = "accounts";

// ============================================================================
// Ledger selection
// ============================================================================

/// Which ledgers to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerSelection {
    /// bitcoind.
    pub bitcoin: bool,
    /// geth.
    pub ethereum: bool,
    /// lnd for Alice and Bob. Implies bitcoin.
    pub lightning: bool,
}

impl LedgerSelection {
    /// Every ledger.
    pub fn all() -> Self {
        Self {
            bitcoin: true,
            ethereum: true,
            lightning: true,
        }
    }

    /// No ledger.
    pub fn none() -> Self {
        Self {
            bitcoin: false,
            ethereum: false,
            lightning: false,
        }
    }

    /// Parse a comma separated list such as `bitcoin,ethereum`, or `all`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut selection = Self::none();
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "all" => selection = Self::all(),
                "bitcoin" => selection.bitcoin = true,
                "ethereum" => selection.ethereum = true,
                "lightning" => selection.lightning = true,
                other => {
                    return Err(HarnessError::invalid_data(
                        "ledgers",
                        format!("unknown ledger {:?}", other),
                    ))
                }
            }
        }
        if selection == Self::none() {
            return Err(HarnessError::invalid_data("ledgers", "no ledger selected"));
        }
        Ok(selection.normalized())
    }

    /// Lightning runs on top of bitcoind.
    pub fn normalized(mut self) -> Self {
        if self.lightning {
            self.bitcoin = true;
        }
        self
    }
}

impl fmt::Display for LedgerSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.bitcoin, "bitcoin"),
            (self.ethereum, "ethereum"),
            (self.lightning, "lightning"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        f.write_str(&names.join(","))
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Started ledgers plus the actors using them.
pub struct Environment {
    config: HarnessConfig,
    ledgers: LedgerConfigs,
    bitcoind: Option<LedgerHandle<BitcoindInstance>>,
    geth: Option<LedgerHandle<GethInstance>>,
    lnd_alice: Option<LedgerHandle<LndInstance>>,
    lnd_bob: Option<LedgerHandle<LndInstance>>,
    locks: TransactionLocks,
    bitcoin_faucet: Option<BitcoinFaucet>,
    ethereum_faucet: Option<EthereumFaucet>,
    registry: Arc<ActorRegistry>,
    engine: Arc<ActionPollingEngine>,
}

impl Environment {
    /// Start (or reuse) the ledgers selected in `config`.
    pub async fn start(config: HarnessConfig) -> Result<Self> {
        let selection = config.ledgers.normalized();
        std::fs::create_dir_all(config.locks_dir())?;
        std::fs::create_dir_all(config.log_dir())?;
        tracing::info!(root = %config.root.display(), ledgers = %selection, "starting environment");

        let manager = LedgerLifecycleManager::new(RetryPolicy::ledger());
        let (geth, (bitcoind, lnd)) = tokio::try_join!(
            start_ethereum(&manager, &config, selection),
            start_bitcoin_and_lightning(&manager, &config, selection),
        )?;
        let (lnd_alice, lnd_bob) = match lnd {
            Some((alice, bob)) => (Some(alice), Some(bob)),
            None => (None, None),
        };

        let ledgers = LedgerConfigs {
            bitcoin: bitcoind.as_ref().map(|h| h.config().clone()),
            ethereum: geth.as_ref().map(|h| h.config().clone()),
            lnd_alice: lnd_alice.as_ref().map(|h| h.config().clone()),
            lnd_bob: lnd_bob.as_ref().map(|h| h.config().clone()),
        };

        let locks = TransactionLocks::new(config.lock_dir(ACCOUNTS_LOCK));
        let bitcoin_faucet = ledgers.bitcoin.as_ref().map(BitcoinFaucet::new).transpose()?;
        let ethereum_faucet = ledgers
            .ethereum
            .as_ref()
            .map(|c| EthereumFaucet::from_config(c, locks.clone()))
            .transpose()?;

        let engine = Arc::new(ActionPollingEngine::new(config.polling));
        tracing::info!("environment ready");

        Ok(Self {
            config,
            ledgers,
            bitcoind,
            geth,
            lnd_alice,
            lnd_bob,
            locks,
            bitcoin_faucet,
            ethereum_faucet,
            registry: ActorRegistry::new(),
            engine,
        })
    }

    /// Harness configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Connection parameters of every started ledger.
    pub fn ledgers(&self) -> &LedgerConfigs {
        &self.ledgers
    }

    /// Locks shared by every wallet of this environment.
    pub fn locks(&self) -> &TransactionLocks {
        &self.locks
    }

    /// Faucet of the bitcoin miner wallet.
    pub fn bitcoin_faucet(&self) -> Result<&BitcoinFaucet> {
        self.bitcoin_faucet
            .as_ref()
            .ok_or_else(|| HarnessError::MissingWallet("bitcoin".to_string()))
    }

    /// Faucet of the ethereum dev account.
    pub fn ethereum_faucet(&self) -> Result<&EthereumFaucet> {
        self.ethereum_faucet
            .as_ref()
            .ok_or_else(|| HarnessError::MissingWallet("ethereum".to_string()))
    }

    /// Actors created so far.
    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    /// Engine shared by every actor.
    pub fn engine(&self) -> &Arc<ActionPollingEngine> {
        &self.engine
    }

    /// Factory trading the token deployed on the ethereum ledger.
    pub fn swap_factory(&self) -> Result<SwapFactory> {
        let token_contract = self
            .ledgers
            .ethereum
            .as_ref()
            .and_then(|e| e.token_contract.clone())
            .ok_or_else(|| HarnessError::invalid_data("token_contract", "no token deployed"))?;
        Ok(SwapFactory::new(token_contract))
    }

    /// Lightning node of `name`, if it has one.
    pub fn lnd_config(&self, name: ActorName) -> Option<&LightningNodeConfig> {
        match name {
            ActorName::Alice => self.ledgers.lnd_alice.as_ref(),
            ActorName::Bob => self.ledgers.lnd_bob.as_ref(),
            ActorName::Charlie => None,
        }
    }

    /// Create wallets on every started ledger for `name`.
    pub async fn new_wallets(&self, name: ActorName) -> Result<Wallets> {
        let mut wallets = Wallets::new();

        if let (Some(config), Some(faucet)) = (&self.ledgers.bitcoin, &self.bitcoin_faucet) {
            let wallet = BitcoindWallet::new_instance(config, faucet.clone()).await?;
            wallets = wallets.with_bitcoin(Arc::new(wallet));
        }
        if let (Some(config), Some(faucet)) = (&self.ledgers.ethereum, &self.ethereum_faucet) {
            let wallet = EthereumWallet::new_instance(config, faucet.clone(), self.locks.clone())?;
            wallets = wallets.with_ethereum(Arc::new(wallet));
        }
        if let (Some(config), Some(faucet)) = (self.lnd_config(name), &self.bitcoin_faucet) {
            let wallet = LightningWallet::new_instance(config, faucet.clone()).await?;
            wallets = wallets.with_lightning(Arc::new(wallet));
        }

        tracing::debug!(actor = %name, ledgers = ?wallets.ledgers(), "wallets created");
        Ok(wallets)
    }

    /// Daemon configuration for `name` connected to every started ledger.
    pub fn cnd_config(&self, name: ActorName, overrides: &CndConfigOverrides) -> Result<CndConfigFile> {
        let data_dir = self.config.node_dir(&format!("cnd-{}", name)).join("data");
        let mut config = CndConfigFile::new(data_dir, free_port(None)?, free_port(None)?);

        if let Some(bitcoin) = &self.ledgers.bitcoin {
            config = config.with_bitcoin(bitcoin);
        }
        if let Some(ethereum) = &self.ledgers.ethereum {
            config = config.with_ethereum(ethereum);
        }
        if let Some(lnd) = self.lnd_config(name) {
            config = config.with_lightning(lnd);
        }
        Ok(config.merge(overrides))
    }

    /// Build wallets and a daemon for `name`, start it and register the
    /// actor.
    pub async fn new_actor(
        &self,
        name: ActorName,
        overrides: &CndConfigOverrides,
    ) -> Result<Arc<Actor>> {
        let wallets = self.new_wallets(name).await?;
        let cnd_config = self.cnd_config(name, overrides)?;
        let cnd = CndInstance::with_binary(
            self.config.binaries.cnd()?,
            name.as_str(),
            &self.config.node_dir(&format!("cnd-{}", name)),
            cnd_config,
        );

        let mut actor = Actor::new(name, cnd, wallets, self.engine.clone())
            .await?
            .with_registry(Arc::downgrade(&self.registry));
        if let Some(contract) = self.ledgers.ethereum.as_ref().and_then(|e| e.token_contract.clone()) {
            actor = actor.with_token_contract(contract);
        }

        self.registry.register(actor)
    }

    /// Fund both lnd wallets and open a channel of `quantity` sats in each
    /// direction.
    pub async fn setup_lightning_channels(
        alice: &LightningWallet,
        bob: &LightningWallet,
        quantity: u128,
    ) -> Result<()> {
        alice.connect_peer(bob).await?;

        let funds = Asset::lightning_bitcoin(quantity);
        tokio::try_join!(alice.mint(&funds), bob.mint(&funds))?;

        alice.open_channel(bob, quantity).await?;
        bob.open_channel(alice, quantity).await?;
        tracing::info!(quantity, "lightning channels open in both directions");
        Ok(())
    }

    /// Stop every actor, then every ledger this environment started. Never
    /// fails.
    pub async fn teardown(&mut self) {
        tracing::info!("tearing down environment");
        self.registry.stop_all().await;

        // lnd depends on bitcoind
        for handle in [self.lnd_alice.as_mut(), self.lnd_bob.as_mut()]
            .into_iter()
            .flatten()
        {
            handle.stop().await;
        }
        if let Some(handle) = self.bitcoind.as_mut() {
            handle.stop().await;
        }
        if let Some(handle) = self.geth.as_mut() {
            handle.stop().await;
        }
    }

    /// Kill every node recorded under `locks_dir` and forget its config.
    /// Never fails.
    pub fn cleanup(locks_dir: &Path) -> Vec<(PathBuf, Option<u32>)> {
        let mut dirs = ledger_lock_dirs(locks_dir);
        // lnd before the bitcoind it depends on
        dirs.sort_by_key(|dir| !is_lnd_dir(dir));

        let mut killed = Vec::new();
        for dir in dirs {
            let pid = kill_pid_file(&dir.join(PID_FILE_NAME));
            for file in [CONFIG_FILE_NAME, PID_FILE_NAME] {
                let path = dir.join(file);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove");
                    }
                }
            }
            killed.push((dir, pid));
        }
        killed
    }
}

/// Subdirectories of `locks_dir` holding a persisted ledger.
pub fn ledger_lock_dirs(locks_dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(locks_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %locks_dir.display(), error = %e, "no lock directory");
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_dir()
                && (path.join(CONFIG_FILE_NAME).exists() || path.join(PID_FILE_NAME).exists())
        })
        .collect();
    dirs.sort();
    dirs
}

fn is_lnd_dir(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("lnd"))
        .unwrap_or(false)
}

async fn start_ethereum(
    manager: &LedgerLifecycleManager,
    config: &HarnessConfig,
    selection: LedgerSelection,
) -> Result<Option<LedgerHandle<GethInstance>>> {
    if !selection.ethereum {
        return Ok(None);
    }
    let handle = manager
        .start(&config.lock_dir(GETH_LOCK), || {
            Ok(GethInstance::with_binary(config.binaries.geth()?, config.node_dir(GETH_LOCK))?
                .with_locks_dir(config.lock_dir(ACCOUNTS_LOCK)))
        })
        .await?;
    Ok(Some(handle))
}

type LndPair = (LedgerHandle<LndInstance>, LedgerHandle<LndInstance>);

async fn start_bitcoin_and_lightning(
    manager: &LedgerLifecycleManager,
    config: &HarnessConfig,
    selection: LedgerSelection,
) -> Result<(Option<LedgerHandle<BitcoindInstance>>, Option<LndPair>)> {
    if !selection.bitcoin {
        return Ok((None, None));
    }
    let bitcoind = manager
        .start(&config.lock_dir(BITCOIND_LOCK), || {
            BitcoindInstance::with_binary(config.binaries.bitcoind()?, config.node_dir(BITCOIND_LOCK))
        })
        .await?;

    if !selection.lightning {
        return Ok((Some(bitcoind), None));
    }
    let bitcoin = bitcoind.config().clone();
    let (alice, bob) = tokio::try_join!(
        start_lnd(manager, config, LND_ALICE_LOCK, &bitcoin),
        start_lnd(manager, config, LND_BOB_LOCK, &bitcoin),
    )?;
    Ok((Some(bitcoind), Some((alice, bob))))
}

async fn start_lnd(
    manager: &LedgerLifecycleManager,
    config: &HarnessConfig,
    name: &str,
    bitcoin: &BitcoinNodeConfig,
) -> Result<LedgerHandle<LndInstance>> {
    manager
        .start(&config.lock_dir(name), || {
            LndInstance::with_binary(
                config.binaries.lnd()?,
                name,
                config.node_dir(name),
                bitcoin.clone(),
            )
        })
        .await
}

/// Snapshot of the ledgers persisted under `locks_dir`, for reporting.
pub fn persisted_ledgers(locks_dir: &Path) -> Result<LedgerConfigs> {
    use crate::ledgers::lifecycle::read_persisted_config;

    Ok(LedgerConfigs {
        bitcoin: read_persisted_config::<BitcoinNodeConfig>(&locks_dir.join(BITCOIND_LOCK))?,
        ethereum: read_persisted_config::<EthereumNodeConfig>(&locks_dir.join(GETH_LOCK))?,
        lnd_alice: read_persisted_config::<LightningNodeConfig>(&locks_dir.join(LND_ALICE_LOCK))?,
        lnd_bob: read_persisted_config::<LightningNodeConfig>(&locks_dir.join(LND_BOB_LOCK))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection() {
        let selection = LedgerSelection::parse("ethereum").unwrap();
        assert!(selection.ethereum && !selection.bitcoin && !selection.lightning);

        let selection = LedgerSelection::parse("lightning, ethereum").unwrap();
        assert!(selection.bitcoin, "lightning implies bitcoin");
        assert_eq!(selection.to_string(), "bitcoin,ethereum,lightning");

        assert_eq!(LedgerSelection::parse("ALL").unwrap(), LedgerSelection::all());
        assert!(LedgerSelection::parse("").is_err());
        assert!(LedgerSelection::parse("dogecoin").is_err());
    }

    #[test]
    fn test_cleanup_removes_persisted_configs() {
        let dir = tempfile::tempdir().unwrap();
        let geth = dir.path().join(GETH_LOCK);
        let lnd = dir.path().join(LND_ALICE_LOCK);
        let unrelated = dir.path().join(ACCOUNTS_LOCK);
        for d in [&geth, &lnd, &unrelated] {
            std::fs::create_dir_all(d).unwrap();
        }
        std::fs::write(geth.join(CONFIG_FILE_NAME), "{}").unwrap();
        std::fs::write(lnd.join(CONFIG_FILE_NAME), "{}").unwrap();

        let cleaned = Environment::cleanup(dir.path());

        let dirs: Vec<_> = cleaned.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(dirs, vec![lnd.clone(), geth.clone()]);
        assert!(cleaned.iter().all(|(_, pid)| pid.is_none()));
        assert!(!geth.join(CONFIG_FILE_NAME).exists());
        assert!(!lnd.join(CONFIG_FILE_NAME).exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_cleanup_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Environment::cleanup(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn test_persisted_ledgers_of_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(persisted_ledgers(dir.path()).unwrap(), LedgerConfigs::default());
    }
}
