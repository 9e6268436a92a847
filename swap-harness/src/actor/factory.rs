//! Default creation bodies for a pair of actors.

use crate::asset::LedgerKind;
use crate::daemon::payload::{CreateSwap, HalbitParams, HbitParams, Herc20Params, Peer};
use crate::daemon::Role;
use crate::Result;

use super::Actor;

/// Satoshis swapped on-chain.
pub const DEFAULT_HBIT_AMOUNT: u128 = 1_000_000;
/// Satoshis swapped over lightning.
pub const DEFAULT_HALBIT_AMOUNT: u128 = 100_000;
/// Token wei swapped.
pub const DEFAULT_HERC20_AMOUNT: u128 = 9_000_000_000_000_000_000;
/// Chain id of the dev chain.
pub const DEFAULT_CHAIN_ID: u64 = 1337;
/// Bitcoin network name.
pub const DEFAULT_NETWORK: &str = "regtest";

/// Seconds until the alpha escrow can be refunded.
const ALPHA_EXPIRY_OFFSET: u64 = 240;
/// Seconds until the beta escrow can be refunded.
const BETA_EXPIRY_OFFSET: u64 = 120;
/// CLTV expiry of lightning payments, in blocks.
const HALBIT_CLTV_EXPIRY: u64 = 350;

/// Knobs for generated bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapSettings {
    /// Expire both escrows immediately, so a refund is possible right away.
    pub instant_refund: bool,
    /// On-chain satoshis.
    pub hbit_amount: u128,
    /// Lightning satoshis.
    pub halbit_amount: u128,
    /// Token wei.
    pub herc20_amount: u128,
    /// Ethereum chain id.
    pub chain_id: u64,
    /// Bitcoin network.
    pub network: String,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            instant_refund: false,
            hbit_amount: DEFAULT_HBIT_AMOUNT,
            halbit_amount: DEFAULT_HALBIT_AMOUNT,
            herc20_amount: DEFAULT_HERC20_AMOUNT,
            chain_id: DEFAULT_CHAIN_ID,
            network: DEFAULT_NETWORK.to_string(),
        }
    }
}

impl SwapSettings {
    /// Expire both escrows immediately.
    pub fn with_instant_refund(mut self) -> Self {
        self.instant_refund = true;
        self
    }
}

/// Matching bodies for Alice and Bob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapPair<A, B> {
    /// Body to POST to Alice's daemon.
    pub alice: CreateSwap<A, B>,
    /// Body to POST to Bob's daemon.
    pub bob: CreateSwap<A, B>,
}

/// Bodies for every supported protocol combination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapBodies {
    /// herc20 → hbit.
    pub herc20_hbit: SwapPair<Herc20Params, HbitParams>,
    /// hbit → herc20.
    pub hbit_herc20: SwapPair<HbitParams, Herc20Params>,
    /// herc20 → halbit, when both actors have lightning wallets.
    pub herc20_halbit: Option<SwapPair<Herc20Params, HalbitParams>>,
    /// halbit → herc20, when both actors have lightning wallets.
    pub halbit_herc20: Option<SwapPair<HalbitParams, Herc20Params>>,
}

/// Identities of one actor on every ledger.
#[derive(Clone, Debug)]
struct Identities {
    peer: Peer,
    bitcoin_address: String,
    ethereum_account: String,
    lightning_pubkey: Option<String>,
}

/// Builds creation bodies trading the token at `token_contract`.
#[derive(Clone, Debug)]
pub struct SwapFactory {
    token_contract: String,
    settings: SwapSettings,
}

impl SwapFactory {
    /// Factory with default settings.
    pub fn new(token_contract: impl Into<String>) -> Self {
        Self {
            token_contract: token_contract.into(),
            settings: SwapSettings::default(),
        }
    }

    /// Replace the settings.
    pub fn with_settings(mut self, settings: SwapSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Bodies for a swap between `alice` and `bob`, with expiries relative to
    /// the current time of Alice's ethereum ledger.
    pub async fn new_swap(&self, alice: &Actor, bob: &Actor) -> Result<SwapBodies> {
        let now = match alice.current_blockchain_time(LedgerKind::Ethereum).await {
            Ok(now) => now,
            Err(e) => {
                tracing::warn!(error = %e, "no blockchain time, using the local clock");
                chrono::Utc::now().timestamp().max(0) as u64
            }
        };

        let alice_ids = identities(alice).await?;
        let bob_ids = identities(bob).await?;
        Ok(self.bodies(now, &alice_ids, &bob_ids))
    }

    fn bodies(&self, now: u64, alice: &Identities, bob: &Identities) -> SwapBodies {
        let (alpha_expiry, beta_expiry) = if self.settings.instant_refund {
            (now, now)
        } else {
            (now + ALPHA_EXPIRY_OFFSET, now + BETA_EXPIRY_OFFSET)
        };

        let herc20_hbit = SwapPair {
            alice: CreateSwap {
                alpha: self.herc20(alice, alpha_expiry),
                beta: self.hbit(alice, beta_expiry),
                role: Role::Alice,
                peer: bob.peer.clone(),
            },
            bob: CreateSwap {
                alpha: self.herc20(bob, alpha_expiry),
                beta: self.hbit(bob, beta_expiry),
                role: Role::Bob,
                peer: alice.peer.clone(),
            },
        };

        let hbit_herc20 = SwapPair {
            alice: CreateSwap {
                alpha: self.hbit(alice, alpha_expiry),
                beta: self.herc20(alice, beta_expiry),
                role: Role::Alice,
                peer: bob.peer.clone(),
            },
            bob: CreateSwap {
                alpha: self.hbit(bob, alpha_expiry),
                beta: self.herc20(bob, beta_expiry),
                role: Role::Bob,
                peer: alice.peer.clone(),
            },
        };

        let lightning = match (&alice.lightning_pubkey, &bob.lightning_pubkey) {
            (Some(alice_pk), Some(bob_pk)) => Some((alice_pk, bob_pk)),
            _ => None,
        };

        let herc20_halbit = lightning.map(|(alice_pk, bob_pk)| SwapPair {
            alice: CreateSwap {
                alpha: self.herc20(alice, alpha_expiry),
                beta: self.halbit(alice_pk),
                role: Role::Alice,
                peer: bob.peer.clone(),
            },
            bob: CreateSwap {
                alpha: self.herc20(bob, alpha_expiry),
                beta: self.halbit(bob_pk),
                role: Role::Bob,
                peer: alice.peer.clone(),
            },
        });

        let halbit_herc20 = lightning.map(|(alice_pk, bob_pk)| SwapPair {
            alice: CreateSwap {
                alpha: self.halbit(alice_pk),
                beta: self.herc20(alice, beta_expiry),
                role: Role::Alice,
                peer: bob.peer.clone(),
            },
            bob: CreateSwap {
                alpha: self.halbit(bob_pk),
                beta: self.herc20(bob, beta_expiry),
                role: Role::Bob,
                peer: alice.peer.clone(),
            },
        });

        SwapBodies {
            herc20_hbit,
            hbit_herc20,
            herc20_halbit,
            halbit_herc20,
        }
    }

    fn hbit(&self, ids: &Identities, absolute_expiry: u64) -> HbitParams {
        HbitParams {
            amount: self.settings.hbit_amount,
            final_identity: ids.bitcoin_address.clone(),
            network: self.settings.network.clone(),
            absolute_expiry,
        }
    }

    fn herc20(&self, ids: &Identities, absolute_expiry: u64) -> Herc20Params {
        Herc20Params {
            amount: self.settings.herc20_amount,
            token_contract: self.token_contract.clone(),
            identity: ids.ethereum_account.clone(),
            chain_id: self.settings.chain_id,
            absolute_expiry,
        }
    }

    fn halbit(&self, pubkey: &str) -> HalbitParams {
        HalbitParams {
            amount: self.settings.halbit_amount,
            identity: pubkey.to_string(),
            network: self.settings.network.clone(),
            cltv_expiry: HALBIT_CLTV_EXPIRY,
        }
    }
}

async fn identities(actor: &Actor) -> Result<Identities> {
    let wallets = actor.wallets();
    let lightning_pubkey = match wallets.lightning() {
        Ok(lnd) => Some(lnd.get_pubkey().await?),
        Err(_) => None,
    };

    Ok(Identities {
        peer: actor.as_peer().await?,
        bitcoin_address: wallets.bitcoin()?.get_address().await?,
        ethereum_account: wallets.ethereum()?.account().to_string(),
        lightning_pubkey,
    })
}
