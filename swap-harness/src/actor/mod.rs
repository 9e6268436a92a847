//! Actors: named swap participants.
//!
//! An [`Actor`] owns one daemon process and the wallets it swaps with. Test
//! scripts create a swap on two actors and then drive each one through the
//! protocol with [`Actor::fund`], [`Actor::redeem`] and friends, which
//! delegate to the [`ActionPollingEngine`]. Balances are snapshotted when the
//! swap is created and checked by [`Actor::assert_swapped`] or
//! [`Actor::assert_refunded`] at the end.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::asset::{Asset, AssetKey, LedgerKind};
use crate::balance::BalanceAsserter;
use crate::daemon::payload::{
    escrow_status, BtcDaiOrder, HalbitHerc20Body, HbitHerc20Body, Herc20HalbitBody,
    Herc20HbitBody, OrderSwap, Peer, Position,
};
use crate::daemon::{CndClient, CndInstance, EscrowStatus, Role, SwapEntity, SwapStatus};
use crate::polling::{ActionKind, ActionOutcome, ActionPollingEngine};
use crate::swap::Swap;
use crate::wallets::Wallets;
use crate::{HarnessError, Result};

pub mod factory;
pub mod registry;

pub use factory::{SwapBodies, SwapFactory, SwapPair, SwapSettings};
pub use registry::{ActorName, ActorRegistry};

/// Bound for a swap created by the counterparty to show up.
const WAIT_FOR_SWAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound for a dialled peer to show up as connected.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between polls of the daemon.
const DAEMON_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pause between reads of the blockchain time.
const EXPIRY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound for a ledger to pass an expiry.
const EXPIRY_WAIT_LIMIT: Duration = Duration::from_secs(600);

const SATS_PER_BTC: u128 = 100_000_000;

/// Alpha or beta side of a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// The ledger Alice funds.
    Alpha,
    /// The ledger Bob funds.
    Beta,
}

impl Side {
    /// Name as used by the daemon.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
        }
    }
}

/// How an actor's balance of an asset is expected to move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceDelta {
    /// Balance grows by the amount.
    Receive(u128),
    /// Balance shrinks by the amount.
    Spend(u128),
}

impl BalanceDelta {
    /// Magnitude of the change.
    pub fn amount(&self) -> u128 {
        match self {
            Self::Receive(amount) | Self::Spend(amount) => *amount,
        }
    }
}

/// Balance bookkeeping and the active swap.
#[derive(Clone, Default)]
struct SwapBook {
    swap: Option<Swap>,
    alpha: Option<Asset>,
    beta: Option<Asset>,
    starting_balances: HashMap<AssetKey, u128>,
    expected_deltas: HashMap<AssetKey, BalanceDelta>,
}

/// A named participant with its own daemon and wallets.
pub struct Actor {
    name: ActorName,
    role: Option<Role>,
    cnd: tokio::sync::Mutex<CndInstance>,
    client: CndClient,
    wallets: Wallets,
    engine: Arc<ActionPollingEngine>,
    registry: Weak<ActorRegistry>,
    token_contract: Option<String>,
    book: tokio::sync::Mutex<SwapBook>,
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl Actor {
    /// Start `cnd` and create an actor around it.
    pub async fn new(
        name: ActorName,
        mut cnd: CndInstance,
        wallets: Wallets,
        engine: Arc<ActionPollingEngine>,
    ) -> Result<Self> {
        cnd.start().await?;
        Self::unstarted(name, cnd, wallets, engine)
    }

    /// Create an actor without starting its daemon.
    pub fn unstarted(
        name: ActorName,
        cnd: CndInstance,
        wallets: Wallets,
        engine: Arc<ActionPollingEngine>,
    ) -> Result<Self> {
        let client = CndClient::new(cnd.config().http_api_url())?;
        tracing::info!(actor = %name, http_api = %client.base_url(), "created actor");

        Ok(Self {
            name,
            role: name.default_role(),
            cnd: tokio::sync::Mutex::new(cnd),
            client,
            wallets,
            engine,
            registry: Weak::new(),
            token_contract: None,
            book: tokio::sync::Mutex::new(SwapBook::default()),
        })
    }

    /// Look up counterparties in `registry`.
    pub fn with_registry(mut self, registry: Weak<ActorRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Token traded in orders.
    pub fn with_token_contract(mut self, contract: impl Into<String>) -> Self {
        self.token_contract = Some(contract.into());
        self
    }

    /// Role used for orders.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Name of the actor.
    pub fn name(&self) -> ActorName {
        self.name
    }

    /// Client for the actor's daemon.
    pub fn client(&self) -> &CndClient {
        &self.client
    }

    /// Wallets of the actor.
    pub fn wallets(&self) -> &Wallets {
        &self.wallets
    }

    /// The registered actor named `name`.
    pub fn counterparty(&self, name: ActorName) -> Result<Arc<Actor>> {
        let registry = self.registry.upgrade().ok_or_else(|| {
            HarnessError::invalid_data("registry", format!("{} is not registered", self.name))
        })?;
        registry.get(name)
    }

    // ========================================================================
    // Daemon lifecycle
    // ========================================================================

    /// Start the daemon. No-op when running.
    pub async fn start(&self) -> Result<()> {
        self.cnd.lock().await.start().await
    }

    /// Stop the daemon. Never fails.
    pub async fn stop(&self) {
        tracing::debug!(actor = %self.name, "stopping actor");
        self.cnd.lock().await.stop().await;
    }

    /// Stop and start the daemon; swaps resume from its data directory.
    pub async fn restart(&self) -> Result<()> {
        self.cnd.lock().await.restart().await
    }

    /// The daemon's peer id.
    pub async fn peer_id(&self) -> Result<String> {
        self.client.get_peer_id().await
    }

    /// First address the daemon listens on.
    pub async fn listen_address(&self) -> Result<String> {
        self.client
            .get_root()
            .await?
            .listen_addresses
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::invalid_data("listen_addresses", "daemon listens nowhere"))
    }

    /// This actor as a swap counterparty.
    pub async fn as_peer(&self) -> Result<Peer> {
        let root = self.client.get_root().await?;
        let address_hint = root.listen_addresses.into_iter().next().ok_or_else(|| {
            HarnessError::invalid_data("listen_addresses", "daemon listens nowhere")
        })?;
        Ok(Peer {
            peer_id: root.id,
            address_hint,
        })
    }

    /// Dial `other` and wait until the connection is established.
    pub async fn connect(&self, other: &Actor) -> Result<()> {
        let root = other.client.get_root().await?;
        tracing::info!(actor = %self.name, peer = %root.id, "connecting");

        self.client.dial(&root.listen_addresses).await?;
        self.poll_until_connected_to(&root.id).await?;

        tracing::info!(actor = %self.name, peer = %root.id, "connected");
        Ok(())
    }

    /// Connect to the registered actor named `name`.
    pub async fn connect_to(&self, name: ActorName) -> Result<()> {
        let other = self.counterparty(name)?;
        self.connect(&other).await
    }

    async fn poll_until_connected_to(&self, peer_id: &str) -> Result<()> {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let peers = self.client.get_peers().await?;
            if peers.iter().any(|p| p.id == peer_id) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::timeout(
                    format!("connection to {}", peer_id),
                    CONNECT_TIMEOUT,
                ));
            }
            tokio::time::sleep(DAEMON_POLL_INTERVAL).await;
        }
    }

    // ========================================================================
    // Swap creation
    // ========================================================================

    /// Create a herc20 → hbit swap.
    pub async fn create_herc20_hbit_swap(&self, body: Herc20HbitBody) -> Result<String> {
        let alpha = Asset::erc20(body.alpha.amount, &body.alpha.token_contract);
        let beta = Asset::bitcoin(body.beta.amount);
        self.create_swap("/swaps/herc20/hbit", &body, body.role, alpha, beta)
            .await
    }

    /// Create a hbit → herc20 swap.
    pub async fn create_hbit_herc20_swap(&self, body: HbitHerc20Body) -> Result<String> {
        let alpha = Asset::bitcoin(body.alpha.amount);
        let beta = Asset::erc20(body.beta.amount, &body.beta.token_contract);
        self.create_swap("/swaps/hbit/herc20", &body, body.role, alpha, beta)
            .await
    }

    /// Create a herc20 → halbit swap.
    pub async fn create_herc20_halbit_swap(&self, body: Herc20HalbitBody) -> Result<String> {
        let alpha = Asset::erc20(body.alpha.amount, &body.alpha.token_contract);
        let beta = Asset::lightning_bitcoin(body.beta.amount);
        self.create_swap("/swaps/herc20/halbit", &body, body.role, alpha, beta)
            .await
    }

    /// Create a halbit → herc20 swap.
    pub async fn create_halbit_herc20_swap(&self, body: HalbitHerc20Body) -> Result<String> {
        let alpha = Asset::lightning_bitcoin(body.alpha.amount);
        let beta = Asset::erc20(body.beta.amount, &body.beta.token_contract);
        self.create_swap("/swaps/halbit/herc20", &body, body.role, alpha, beta)
            .await
    }

    async fn create_swap<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        role: Role,
        alpha: Asset,
        beta: Asset,
    ) -> Result<String> {
        self.prepare_balances(role, alpha, beta).await?;

        let location = self.client.create_swap(path, body).await?;
        self.book.lock().await.swap = Some(Swap::new(
            self.client.clone(),
            &location,
            self.wallets.clone(),
        ));
        tracing::info!(actor = %self.name, swap = %location, "swap created");
        Ok(location)
    }

    /// Publish a BTC/DAI order for `quantity` BTC at `price` DAI per BTC, both
    /// given as decimal strings.
    pub async fn make_btc_dai_order(
        &self,
        position: Position,
        quantity: &str,
        price: &str,
    ) -> Result<String> {
        let role = self.role.ok_or_else(|| {
            HarnessError::invalid_data("role", format!("{} has no role for orders", self.name))
        })?;
        let token_contract = self.token_contract.clone().ok_or_else(|| {
            HarnessError::invalid_data("token_contract", "no token contract configured")
        })?;

        let sats = parse_fixed(quantity, 8)?;
        let wei_per_sat = parse_fixed(price, 18)? / SATS_PER_BTC;
        let dai = sats
            .checked_mul(wei_per_sat)
            .ok_or_else(|| HarnessError::invalid_data("price", "order value overflows"))?;

        let bitcoin = Asset::bitcoin(sats);
        let erc20 = Asset::erc20(dai, token_contract);
        let (alpha, beta) = match (position, role) {
            (Position::Buy, Role::Alice) | (Position::Sell, Role::Bob) => (erc20, bitcoin),
            (Position::Sell, Role::Alice) | (Position::Buy, Role::Bob) => (bitcoin, erc20),
        };
        self.prepare_balances(role, alpha, beta).await?;

        let order = BtcDaiOrder {
            position,
            quantity: sats,
            price: wei_per_sat,
            swap: OrderSwap {
                role,
                bitcoin_address: self.wallets.bitcoin()?.get_address().await?,
                ethereum_address: self.wallets.ethereum()?.account().to_string(),
            },
        };
        let location = self.client.create_order(&order).await?;
        tracing::info!(actor = %self.name, order = %location, "order published");
        Ok(location)
    }

    /// Wait until the daemon reports a swap and make it the active one.
    pub async fn wait_for_swap(&self) -> Result<String> {
        let deadline = Instant::now() + WAIT_FOR_SWAP_TIMEOUT;
        let href = loop {
            let swaps = self.client.list_swaps().await?;
            if let Some(href) = swaps.entities.first().and_then(|e| e.href()) {
                break href.to_string();
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::timeout(
                    "a swap to appear",
                    WAIT_FOR_SWAP_TIMEOUT,
                ));
            }
            tokio::time::sleep(DAEMON_POLL_INTERVAL).await;
        };

        self.book.lock().await.swap = Some(Swap::new(
            self.client.clone(),
            &href,
            self.wallets.clone(),
        ));
        tracing::info!(actor = %self.name, swap = %href, "swap appeared");
        Ok(href)
    }

    /// Mint the swapped assets and snapshot their balances.
    ///
    /// Runs before the swap is created, so the snapshot never includes an
    /// effect of the swap.
    async fn prepare_balances(&self, role: Role, alpha: Asset, beta: Asset) -> Result<()> {
        alpha.validate()?;
        beta.validate()?;

        let (spent, received) = match role {
            Role::Alice => (&alpha, &beta),
            Role::Bob => (&beta, &alpha),
        };

        let mut starting_balances = HashMap::new();
        for asset in [&alpha, &beta] {
            let wallet = self.wallets.for_ledger(asset.ledger)?;
            match asset.ledger {
                // on-chain bitcoin needs headroom for miner fees
                LedgerKind::Bitcoin => {
                    wallet
                        .mint(&asset.with_quantity(asset.quantity.saturating_mul(2)))
                        .await?
                }
                LedgerKind::Ethereum => wallet.mint(asset).await?,
                // channels are funded when they are opened
                LedgerKind::Lightning => {}
            }
            let balance = wallet.get_balance_by_asset(asset).await?;
            tracing::debug!(actor = %self.name, asset = %asset.key(), balance, "starting balance");
            starting_balances.insert(asset.key(), balance);
        }

        let mut book = self.book.lock().await;
        book.starting_balances = starting_balances;
        book.expected_deltas = HashMap::from([
            (spent.key(), BalanceDelta::Spend(spent.quantity)),
            (received.key(), BalanceDelta::Receive(received.quantity)),
        ]);
        book.alpha = Some(alpha);
        book.beta = Some(beta);
        Ok(())
    }

    /// Starting balance recorded for `key`.
    pub async fn starting_balance(&self, key: AssetKey) -> Option<u128> {
        self.book.lock().await.starting_balances.get(&key).copied()
    }

    /// Expected movement of `key`.
    pub async fn expected_delta(&self, key: AssetKey) -> Option<BalanceDelta> {
        self.book.lock().await.expected_deltas.get(&key).copied()
    }

    // ========================================================================
    // Protocol steps
    // ========================================================================

    /// Execute `init`.
    pub async fn init(&self) -> Result<ActionOutcome> {
        self.step(ActionKind::Init).await
    }

    /// Execute `accept`.
    pub async fn accept(&self) -> Result<ActionOutcome> {
        self.step(ActionKind::Accept).await
    }

    /// Execute `deploy`.
    pub async fn deploy(&self) -> Result<ActionOutcome> {
        self.step(ActionKind::Deploy).await
    }

    /// Execute `fund`.
    pub async fn fund(&self) -> Result<ActionOutcome> {
        self.step(ActionKind::Fund).await
    }

    /// Execute `redeem`.
    pub async fn redeem(&self) -> Result<ActionOutcome> {
        self.step(ActionKind::Redeem).await
    }

    /// Execute `refund`.
    pub async fn refund(&self) -> Result<ActionOutcome> {
        self.step(ActionKind::Refund).await
    }

    async fn step(&self, kind: ActionKind) -> Result<ActionOutcome> {
        let swap = self.active_swap(kind.as_str()).await?;
        match self.engine.assert_and_execute_next_action(&swap, kind).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(actor = %self.name, action = %kind, error = %e, "step failed");
                self.dump_state().await;
                Err(e)
            }
        }
    }

    async fn active_swap(&self, operation: &str) -> Result<Swap> {
        self.book
            .lock()
            .await
            .swap
            .clone()
            .ok_or_else(|| HarnessError::NoActiveSwap {
                operation: operation.to_string(),
            })
    }

    /// The active swap, if any.
    pub async fn swap(&self) -> Option<Swap> {
        self.book.lock().await.swap.clone()
    }

    /// Current state of the active swap.
    pub async fn swap_details(&self) -> Result<SwapEntity> {
        self.active_swap("fetch swap details")
            .await?
            .fetch_details()
            .await
    }

    // ========================================================================
    // Assertions
    // ========================================================================

    /// Wait for the swap to be SWAPPED and check balances.
    pub async fn assert_swapped(&self) -> Result<()> {
        self.wait_for_status(SwapStatus::Swapped).await?;
        self.assert_balances_after_swap().await
    }

    /// Wait for the swap to be NOT_SWAPPED and check balances.
    pub async fn assert_refunded(&self) -> Result<()> {
        self.wait_for_status(SwapStatus::NotSwapped).await?;
        self.assert_balances_after_refund().await
    }

    /// Check the escrow on `side` is in `expected` state.
    pub async fn assert_ledger_state(&self, side: Side, expected: EscrowStatus) -> Result<()> {
        let swap = self.swap_details().await?;
        let actual = escrow_status(&swap, side.as_str())?;
        if actual == expected {
            Ok(())
        } else {
            Err(HarnessError::invalid_data(
                format!("{} ledger state", side.as_str()),
                format!("expected {:?} but was {:?}", expected, actual),
            ))
        }
    }

    /// Alice spent alpha and received beta; Bob the other way round.
    pub async fn assert_balances_after_swap(&self) -> Result<()> {
        let (role, alpha, beta) = self.balance_asserters().await?;
        let swap_href = self.active_swap("assert balances").await?.self_href().to_string();
        tracing::debug!(actor = %self.name, swap = %swap_href, "checking if swap swapped");

        match role {
            Role::Alice => {
                alpha.0.assert_spent(alpha.1.as_ref()).await?;
                beta.0.assert_received(beta.1.as_ref()).await
            }
            Role::Bob => {
                alpha.0.assert_received(alpha.1.as_ref()).await?;
                beta.0.assert_spent(beta.1.as_ref()).await
            }
        }
    }

    /// Alice got alpha back and received nothing on beta; Bob the other way
    /// round.
    pub async fn assert_balances_after_refund(&self) -> Result<()> {
        let (role, alpha, beta) = self.balance_asserters().await?;
        tracing::debug!(actor = %self.name, "checking if swap was refunded");

        match role {
            Role::Alice => {
                alpha.0.assert_refunded(alpha.1.as_ref()).await?;
                beta.0.assert_nothing_received(beta.1.as_ref()).await
            }
            Role::Bob => {
                alpha.0.assert_nothing_received(alpha.1.as_ref()).await?;
                beta.0.assert_refunded(beta.1.as_ref()).await
            }
        }
    }

    async fn balance_asserters(&self) -> Result<(Role, Checked, Checked)> {
        let swap = self.swap_details().await?;
        let role = swap
            .properties
            .as_ref()
            .map(|p| p.role)
            .ok_or_else(|| HarnessError::invalid_data("swap", "swap resource has no properties"))?;

        let book = self.book.lock().await.clone();
        let alpha = self.asserter_for(&book, book.alpha.as_ref())?;
        let beta = self.asserter_for(&book, book.beta.as_ref())?;
        Ok((role, alpha, beta))
    }

    fn asserter_for(&self, book: &SwapBook, asset: Option<&Asset>) -> Result<Checked> {
        let asset = asset.ok_or_else(|| HarnessError::NoActiveSwap {
            operation: "assert balances".to_string(),
        })?;
        let key = asset.key();
        let starting = book.starting_balances.get(&key).copied().ok_or_else(|| {
            HarnessError::invalid_data("starting balance", format!("none recorded for {}", key))
        })?;
        let delta = book
            .expected_deltas
            .get(&key)
            .map(BalanceDelta::amount)
            .unwrap_or(asset.quantity);

        let wallet = self.wallets.for_ledger(asset.ledger)?;
        let asserter = BalanceAsserter::new(asset.clone(), starting, delta, wallet.maximum_fee());
        Ok((asserter, wallet))
    }

    async fn wait_for_status(&self, expected: SwapStatus) -> Result<()> {
        let timeout = self.engine.config().event_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let status = self
                .swap_details()
                .await?
                .properties
                .and_then(|p| p.status);
            if status == Some(expected) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::timeout(
                    format!("swap status {:?} (last seen {:?})", expected, status),
                    timeout,
                ));
            }
            tokio::time::sleep(self.engine.config().event_interval).await;
        }
    }

    // ========================================================================
    // Diagnostics and time
    // ========================================================================

    /// Log the swap and the balances of the swapped assets. Never fails.
    pub async fn dump_state(&self) {
        tracing::debug!(actor = %self.name, "dumping current state");
        let book = self.book.lock().await.clone();

        if let Some(swap) = &book.swap {
            match swap.fetch_details().await {
                Ok(details) => match serde_json::to_string(&details) {
                    Ok(json) => tracing::info!(actor = %self.name, swap = %json, "swap details"),
                    Err(e) => tracing::warn!(actor = %self.name, error = %e, "failed to render swap"),
                },
                Err(e) => tracing::warn!(actor = %self.name, error = %e, "failed to fetch swap"),
            }
        }

        for asset in book.alpha.iter().chain(book.beta.iter()) {
            let balance = match self.wallets.for_ledger(asset.ledger) {
                Ok(wallet) => wallet.get_balance_by_asset(asset).await,
                Err(e) => Err(e),
            };
            match balance {
                Ok(balance) => tracing::info!(
                    actor = %self.name,
                    asset = %asset.key(),
                    balance,
                    starting = ?book.starting_balances.get(&asset.key()),
                    "balance"
                ),
                Err(e) => tracing::warn!(
                    actor = %self.name,
                    asset = %asset.key(),
                    error = %e,
                    "failed to read balance"
                ),
            }
        }
    }

    /// Timestamp of the latest block of `ledger`, in unix seconds.
    pub async fn current_blockchain_time(&self, ledger: LedgerKind) -> Result<u64> {
        self.wallets.for_ledger(ledger)?.get_blockchain_time().await
    }

    /// Wait until the blockchain time of `ledger` passes `expiry`.
    pub async fn wait_for_expiry(&self, ledger: LedgerKind, expiry: u64) -> Result<()> {
        let wallet = self.wallets.for_ledger(ledger)?;
        let deadline = Instant::now() + EXPIRY_WAIT_LIMIT;
        loop {
            let now = wallet.get_blockchain_time().await?;
            if now > expiry {
                tracing::debug!(ledger = %ledger, expiry, now, "expiry passed");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::timeout(
                    format!("{} to pass expiry {} (now {})", ledger, expiry, now),
                    EXPIRY_WAIT_LIMIT,
                ));
            }
            tokio::time::sleep(EXPIRY_POLL_INTERVAL).await;
        }
    }
}

type Checked = (BalanceAsserter, Arc<dyn crate::wallets::Wallet>);

/// Parse a decimal string like "0.1" into an integer with `decimals` places.
pub fn parse_fixed(value: &str, decimals: u32) -> Result<u128> {
    let invalid = |reason: &str| HarnessError::invalid_data("amount", format!("{:?}: {}", value, reason));

    let (whole, fraction) = value.trim().split_once('.').unwrap_or((value.trim(), ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty"));
    }
    if fraction.len() > decimals as usize {
        return Err(invalid("too many decimal places"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }

    let scale = 10u128.pow(decimals);
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("too large"))?
    };
    let fraction: u128 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse().map_err(|_| invalid("too large"))?
    };

    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| invalid("too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed() {
        assert_eq!(parse_fixed("1", 8).unwrap(), 100_000_000);
        assert_eq!(parse_fixed("0.1", 8).unwrap(), 10_000_000);
        assert_eq!(parse_fixed(".5", 2).unwrap(), 50);
        assert_eq!(parse_fixed("9450", 18).unwrap(), 9_450 * 10u128.pow(18));
        assert!(parse_fixed("0.123456789", 8).is_err());
        assert!(parse_fixed("1e5", 8).is_err());
        assert!(parse_fixed("", 8).is_err());
        assert!(parse_fixed("-1", 8).is_err());
    }

    #[test]
    fn test_order_price_per_sat() {
        // 0.1 BTC at 9450 DAI/BTC
        let sats = parse_fixed("0.1", 8).unwrap();
        let wei_per_sat = parse_fixed("9450", 18).unwrap() / SATS_PER_BTC;
        assert_eq!(sats * wei_per_sat, 945 * 10u128.pow(18));
    }

    #[test]
    fn test_balance_delta_amount() {
        assert_eq!(BalanceDelta::Spend(5).amount(), 5);
        assert_eq!(BalanceDelta::Receive(7).amount(), 7);
        assert_eq!(Side::Alpha.as_str(), "alpha");
    }
}
