//! Per-ledger wallets used by actors.
//!
//! A [`Wallet`] can mint test funds, report balances per asset and tell the
//! ledger's notion of "now". Ledger-specific operations (sending, deploying
//! contracts, paying invoices) live on the concrete wallet types and are
//! reached through [`Wallets`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::asset::{Asset, LedgerKind};
use crate::lock::{LockGuard, LockedResource, RetryPolicy};
use crate::{HarnessError, Result};

pub mod bitcoin;
pub mod eth_tx;
pub mod ethereum;
pub mod lightning;

pub use bitcoin::{BitcoinFaucet, BitcoindWallet};
pub use ethereum::{EthereumFaucet, EthereumWallet};
pub use lightning::{LightningWallet, LndClient};

// ============================================================================
// Wallet trait
// ============================================================================

/// Common surface of all ledger wallets.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Ledger this wallet lives on.
    fn ledger(&self) -> LedgerKind;

    /// Upper bound on fees a single swap may cost this wallet, in the
    /// smallest unit of the ledger's native asset.
    fn maximum_fee(&self) -> u128;

    /// Fund the wallet with at least `asset.quantity` and wait until the
    /// balance reflects it.
    async fn mint(&self, asset: &Asset) -> Result<()>;

    /// Current balance of `asset`.
    async fn get_balance_by_asset(&self, asset: &Asset) -> Result<u128>;

    /// Timestamp of the ledger's latest block, in unix seconds.
    async fn get_blockchain_time(&self) -> Result<u64>;
}

// ============================================================================
// Mint polling
// ============================================================================

/// Bounds for waiting on a minted balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MintPolling {
    /// Give up after this long.
    pub timeout: Duration,
    /// Pause between balance reads.
    pub interval: Duration,
}

impl Default for MintPolling {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(500),
        }
    }
}

/// Poll `wallet` until its `asset` balance reaches `target`.
pub async fn poll_until_minted(
    wallet: &dyn Wallet,
    asset: &Asset,
    target: u128,
    polling: MintPolling,
) -> Result<()> {
    poll_until_balance(&asset.key().to_string(), target, polling, || {
        wallet.get_balance_by_asset(asset)
    })
    .await
}

/// Poll `get_balance` until it reports at least `target`.
pub async fn poll_until_balance<F, Fut>(
    what: &str,
    target: u128,
    polling: MintPolling,
    mut get_balance: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u128>>,
{
    let deadline = Instant::now() + polling.timeout;

    loop {
        let balance = get_balance().await?;
        if balance >= target {
            tracing::debug!(asset = what, balance, target, "balance reached");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::timeout(
                format!(
                    "{} balance to reach {} (last seen {})",
                    what, target, balance
                ),
                polling.timeout,
            ));
        }
        tokio::time::sleep(polling.interval).await;
    }
}

// ============================================================================
// Wallet set
// ============================================================================

/// The wallets of one actor.
#[derive(Clone, Default)]
pub struct Wallets {
    bitcoin: Option<Arc<BitcoindWallet>>,
    ethereum: Option<Arc<EthereumWallet>>,
    lightning: Option<Arc<LightningWallet>>,
}

impl Wallets {
    /// Empty wallet set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bitcoin wallet.
    pub fn with_bitcoin(mut self, wallet: Arc<BitcoindWallet>) -> Self {
        self.bitcoin = Some(wallet);
        self
    }

    /// Add an ethereum wallet.
    pub fn with_ethereum(mut self, wallet: Arc<EthereumWallet>) -> Self {
        self.ethereum = Some(wallet);
        self
    }

    /// Add a lightning wallet.
    pub fn with_lightning(mut self, wallet: Arc<LightningWallet>) -> Self {
        self.lightning = Some(wallet);
        self
    }

    /// The bitcoin wallet.
    pub fn bitcoin(&self) -> Result<&Arc<BitcoindWallet>> {
        self.bitcoin
            .as_ref()
            .ok_or_else(|| HarnessError::MissingWallet(LedgerKind::Bitcoin.to_string()))
    }

    /// The ethereum wallet.
    pub fn ethereum(&self) -> Result<&Arc<EthereumWallet>> {
        self.ethereum
            .as_ref()
            .ok_or_else(|| HarnessError::MissingWallet(LedgerKind::Ethereum.to_string()))
    }

    /// The lightning wallet.
    pub fn lightning(&self) -> Result<&Arc<LightningWallet>> {
        self.lightning
            .as_ref()
            .ok_or_else(|| HarnessError::MissingWallet(LedgerKind::Lightning.to_string()))
    }

    /// The wallet for `ledger`, as a trait object.
    pub fn for_ledger(&self, ledger: LedgerKind) -> Result<Arc<dyn Wallet>> {
        Ok(match ledger {
            LedgerKind::Bitcoin => self.bitcoin()?.clone(),
            LedgerKind::Ethereum => self.ethereum()?.clone(),
            LedgerKind::Lightning => self.lightning()?.clone(),
        })
    }

    /// Ledgers this set has wallets for.
    pub fn ledgers(&self) -> Vec<LedgerKind> {
        let mut ledgers = Vec::new();
        if self.bitcoin.is_some() {
            ledgers.push(LedgerKind::Bitcoin);
        }
        if self.ethereum.is_some() {
            ledgers.push(LedgerKind::Ethereum);
        }
        if self.lightning.is_some() {
            ledgers.push(LedgerKind::Lightning);
        }
        ledgers
    }
}

// ============================================================================
// Transaction locks
// ============================================================================

/// Serializes transactions per signing account.
///
/// Nonces are assigned by asking the node for the pending transaction count,
/// so two transactions from the same account must never be in flight at the
/// same time. Tasks in this process queue on an async mutex; other processes
/// are excluded by a file lock in `dir`, when one is configured.
#[derive(Clone, Debug)]
pub struct TransactionLocks {
    dir: Option<PathBuf>,
    policy: RetryPolicy,
    accounts: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TransactionLocks {
    /// Locks shared by tasks of this process only.
    pub fn in_process() -> Self {
        Self {
            dir: None,
            policy: RetryPolicy::account(),
            accounts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Locks shared with every process using `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::in_process()
        }
    }

    /// Override the file lock retry schedule.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wait until no other transaction for `account` is in flight.
    pub async fn lock(&self, account: &str) -> Result<AccountLock> {
        let key = account.to_lowercase();
        let mutex = {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            accounts.entry(key.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;

        let file = match &self.dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(format!("{}.lock", key));
                Some(LockedResource::acquire_file(&path, &self.policy).await?)
            }
            None => None,
        };

        tracing::trace!(account = %key, "acquired transaction lock");
        Ok(AccountLock {
            _file: file,
            _guard: guard,
        })
    }
}

impl Default for TransactionLocks {
    fn default() -> Self {
        Self::in_process()
    }
}

/// Held while a transaction for one account is in flight.
#[derive(Debug)]
pub struct AccountLock {
    _file: Option<LockGuard>,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}
