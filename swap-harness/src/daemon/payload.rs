//! Request and response bodies of the daemon's swap API.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use super::siren::Entity;
use crate::{HarnessError, Result};

/// Deserialize an amount given as a decimal string, a `0x` hex string or a
/// number.
pub fn quantity<'de, D>(deserializer: D) -> std::result::Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n as u128),
        Raw::Str(s) => parse_quantity(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_quantity(s: &str) -> std::result::Result<u128, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) if hex.is_empty() => Ok(0),
        Some(hex) => u128::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid quantity {:?}: {}", s, e))
}

/// Serialize an amount as a decimal string.
pub fn quantity_as_string<S>(value: &u128, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&value.to_string())
}

// ============================================================================
// Swap resource
// ============================================================================

/// `GET /swaps/:id`.
pub type SwapEntity = Entity<SwapProperties>;

/// Participant role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Initiator; funds alpha, redeems beta.
    Alice,
    /// Responder; funds beta, redeems alpha.
    Bob,
}

impl Role {
    /// All roles.
    pub const ALL: [Role; 2] = [Role::Alice, Role::Bob];

    /// Name as used in payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alice => "Alice",
            Self::Bob => "Bob",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol used on one side of a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTLC on bitcoin.
    Hbit,
    /// Hold invoice on lightning.
    Halbit,
    /// HTLC contract on ethereum for an ERC20 token.
    Herc20,
}

impl Protocol {
    /// All protocols.
    pub const ALL: [Protocol; 3] = [Protocol::Hbit, Protocol::Halbit, Protocol::Herc20];

    /// Name as used in payloads and event names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hbit => "hbit",
            Self::Halbit => "halbit",
            Self::Herc20 => "herc20",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall status of a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    /// Created, communication not finalized.
    Created,
    /// Ledger actions needed or happening.
    InProgress,
    /// Finished, assets exchanged.
    Swapped,
    /// Finished, assets not exchanged.
    NotSwapped,
    /// Aborted by an internal failure.
    InternalFailure,
}

/// Status of the escrow on one ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Does not exist yet.
    None,
    /// Initialized (no cost).
    Initialized,
    /// Deployed.
    Deployed,
    /// Funded with the expected amount.
    Funded,
    /// Redeemed.
    Redeemed,
    /// Refunded.
    Refunded,
    /// Funded with the wrong amount; only refund remains.
    IncorrectlyFunded,
}

/// Ledger-observable events reported in a swap's event log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SwapEventKind {
    /// `herc20_deployed`
    Herc20Deployed,
    /// `<protocol>_funded`
    Funded(Protocol),
    /// `<protocol>_incorrectly_funded`
    IncorrectlyFunded(Protocol),
    /// `<protocol>_redeemed`
    Redeemed(Protocol),
    /// `<protocol>_refunded`
    Refunded(Protocol),
}

impl fmt::Display for SwapEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Herc20Deployed => f.write_str("herc20_deployed"),
            Self::Funded(p) => write!(f, "{}_funded", p),
            Self::IncorrectlyFunded(p) => write!(f, "{}_incorrectly_funded", p),
            Self::Redeemed(p) => write!(f, "{}_redeemed", p),
            Self::Refunded(p) => write!(f, "{}_refunded", p),
        }
    }
}

impl FromStr for SwapEventKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "herc20_deployed" {
            return Ok(Self::Herc20Deployed);
        }
        let (protocol, step) = s
            .split_once('_')
            .ok_or_else(|| HarnessError::invalid_data("event", format!("unknown event {}", s)))?;
        let protocol = Protocol::ALL
            .into_iter()
            .find(|p| p.as_str() == protocol)
            .ok_or_else(|| HarnessError::invalid_data("event", format!("unknown protocol in {}", s)))?;
        match step {
            "funded" => Ok(Self::Funded(protocol)),
            "incorrectly_funded" => Ok(Self::IncorrectlyFunded(protocol)),
            "redeemed" => Ok(Self::Redeemed(protocol)),
            "refunded" => Ok(Self::Refunded(protocol)),
            _ => Err(HarnessError::invalid_data("event", format!("unknown event {}", s))),
        }
    }
}

/// Entry of a swap's event log. Kept as the raw name so unknown events do
/// not break parsing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapEvent {
    /// e.g. "hbit_funded".
    pub name: String,
    /// Timestamp when the daemon observed the event, if reported.
    #[serde(default)]
    pub seen_at: Option<String>,
}

/// One side of a swap as reported by the daemon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerProperties {
    /// Protocol on this side.
    pub protocol: Protocol,
    /// Escrow status, when reported inline.
    #[serde(default)]
    pub status: Option<EscrowStatus>,
    /// Amount in the ledger's smallest unit.
    #[serde(default)]
    pub quantity: Option<String>,
}

/// `properties` of a swap entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapProperties {
    /// Our role, as assigned by the daemon.
    pub role: Role,
    /// Overall status.
    #[serde(default)]
    pub status: Option<SwapStatus>,
    /// Alpha side.
    pub alpha: LedgerProperties,
    /// Beta side.
    pub beta: LedgerProperties,
    /// Observed ledger events, oldest first.
    #[serde(default)]
    pub events: Vec<SwapEvent>,
}

impl SwapProperties {
    /// Whether `event` appears in the event log.
    pub fn has_event(&self, event: SwapEventKind) -> bool {
        let name = event.to_string();
        self.events.iter().any(|e| e.name == name)
    }
}

/// Escrow status reported for one side of `swap`, inline or in a `state`
/// sub-entity.
pub fn escrow_status(swap: &SwapEntity, side: &str) -> Result<EscrowStatus> {
    let inline = swap.properties.as_ref().and_then(|p| match side {
        "alpha" => p.alpha.status,
        "beta" => p.beta.status,
        _ => None,
    });
    if let Some(status) = inline {
        return Ok(status);
    }

    #[derive(Deserialize)]
    struct LedgerState {
        status: EscrowStatus,
    }

    let state = swap.sub_entity(side, "state").ok_or_else(|| {
        HarnessError::invalid_data("swap", format!("no {} ledger state reported", side))
    })?;
    Ok(state.properties_as::<LedgerState>()?.status)
}

// ============================================================================
// Ledger actions
// ============================================================================

/// What the daemon asks the harness to do on a ledger after executing an
/// action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum LedgerAction {
    /// Broadcast a fully signed bitcoin transaction.
    BitcoinBroadcastSignedTransaction {
        /// Raw transaction.
        hex: String,
        /// Network name.
        network: String,
    },
    /// Pay an amount to an address.
    BitcoinSendAmountToAddress {
        /// Destination address.
        to: String,
        /// Satoshis.
        #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
        amount: u128,
        /// Network name.
        network: String,
    },
    /// Call a deployed contract.
    EthereumCallContract {
        /// Contract address.
        contract_address: String,
        /// Call data.
        #[serde(default)]
        data: Option<String>,
        /// Gas limit.
        #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
        gas_limit: u128,
        /// Chain id.
        chain_id: u64,
    },
    /// Deploy a contract.
    EthereumDeployContract {
        /// Init code.
        data: String,
        /// Wei sent with the deployment.
        #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
        amount: u128,
        /// Gas limit.
        #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
        gas_limit: u128,
        /// Chain id.
        chain_id: u64,
    },
    /// Pay a hold invoice.
    LndSendPayment {
        /// Our node.
        self_public_key: String,
        /// Recipient node.
        to_public_key: String,
        /// Satoshis.
        #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
        amount: u128,
        /// Payment hash (hex).
        secret_hash: String,
        /// CLTV delta of the final hop.
        final_cltv_delta: u32,
        /// e.g. "bitcoin".
        chain: String,
        /// e.g. "regtest".
        network: String,
    },
    /// Add a hold invoice.
    LndAddHoldInvoice {
        /// Our node.
        self_public_key: String,
        /// Satoshis.
        #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
        amount: u128,
        /// Payment hash (hex).
        secret_hash: String,
        /// Invoice expiry in seconds.
        expiry: u64,
        /// CLTV expiry in blocks.
        cltv_expiry: u64,
        /// e.g. "bitcoin".
        chain: String,
        /// e.g. "regtest".
        network: String,
    },
    /// Settle a hold invoice.
    LndSettleInvoice {
        /// Our node.
        self_public_key: String,
        /// Preimage (hex).
        secret: String,
        /// e.g. "bitcoin".
        chain: String,
        /// e.g. "regtest".
        network: String,
    },
    /// Nothing to do on a ledger.
    None,
}

impl LedgerAction {
    /// The `type` tag, e.g. "bitcoin-send-amount-to-address".
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BitcoinBroadcastSignedTransaction { .. } => "bitcoin-broadcast-signed-transaction",
            Self::BitcoinSendAmountToAddress { .. } => "bitcoin-send-amount-to-address",
            Self::EthereumCallContract { .. } => "ethereum-call-contract",
            Self::EthereumDeployContract { .. } => "ethereum-deploy-contract",
            Self::LndSendPayment { .. } => "lnd-send-payment",
            Self::LndAddHoldInvoice { .. } => "lnd-add-hold-invoice",
            Self::LndSettleInvoice { .. } => "lnd-settle-invoice",
            Self::None => "none",
        }
    }
}

// ============================================================================
// Creation bodies
// ============================================================================

/// Counterparty of a swap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// libp2p peer id.
    pub peer_id: String,
    /// Multiaddress to dial.
    pub address_hint: String,
}

/// hbit side of a creation body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HbitParams {
    /// Satoshis.
    #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
    pub amount: u128,
    /// Address receiving redeemed or refunded funds.
    pub final_identity: String,
    /// e.g. "regtest".
    pub network: String,
    /// Unix timestamp after which refund is possible.
    pub absolute_expiry: u64,
}

/// herc20 side of a creation body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Herc20Params {
    /// Token quantity in wei.
    #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
    pub amount: u128,
    /// Token contract.
    pub token_contract: String,
    /// Our ethereum account.
    pub identity: String,
    /// Chain id.
    pub chain_id: u64,
    /// Unix timestamp after which refund is possible.
    pub absolute_expiry: u64,
}

/// halbit side of a creation body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HalbitParams {
    /// Satoshis.
    #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
    pub amount: u128,
    /// Our lnd public key.
    pub identity: String,
    /// e.g. "regtest".
    pub network: String,
    /// CLTV expiry in blocks.
    pub cltv_expiry: u64,
}

/// Body of `POST /swaps/<alpha>/<beta>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSwap<A, B> {
    /// Alpha side.
    pub alpha: A,
    /// Beta side.
    pub beta: B,
    /// Our role.
    pub role: Role,
    /// Counterparty.
    pub peer: Peer,
}

/// herc20 → hbit.
pub type Herc20HbitBody = CreateSwap<Herc20Params, HbitParams>;
/// hbit → herc20.
pub type HbitHerc20Body = CreateSwap<HbitParams, Herc20Params>;
/// herc20 → halbit.
pub type Herc20HalbitBody = CreateSwap<Herc20Params, HalbitParams>;
/// halbit → herc20.
pub type HalbitHerc20Body = CreateSwap<HalbitParams, Herc20Params>;

/// Side of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Buy BTC for DAI.
    Buy,
    /// Sell BTC for DAI.
    Sell,
}

/// Swap parameters attached to an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSwap {
    /// Our role once the order is taken.
    pub role: Role,
    /// Our bitcoin address.
    pub bitcoin_address: String,
    /// Our ethereum account.
    pub ethereum_address: String,
}

/// Body of `POST /orders/BTC-DAI`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcDaiOrder {
    /// Buy or sell.
    pub position: Position,
    /// Satoshis.
    #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
    pub quantity: u128,
    /// DAI wei per satoshi.
    #[serde(deserialize_with = "quantity", serialize_with = "quantity_as_string")]
    pub price: u128,
    /// Swap parameters.
    pub swap: OrderSwap,
}
