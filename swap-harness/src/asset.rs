//! Ledgers and the assets that live on them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{HarnessError, Result};

/// One of the value-transfer systems a swap bridges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    /// UTXO chain (bitcoind, regtest).
    Bitcoin,
    /// Account-based chain (geth, dev mode).
    Ethereum,
    /// Payment-channel network (lnd on top of bitcoind).
    Lightning,
}

impl LedgerKind {
    /// Get the ledger name as used in configs and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ethereum",
            Self::Lightning => "lightning",
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit an asset is denominated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Satoshis, on-chain or in a channel.
    Bitcoin,
    /// Wei.
    Ether,
    /// ERC20 token base units.
    Erc20,
}

impl AssetKind {
    /// Get the asset name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Ether => "ether",
            Self::Erc20 => "erc20",
        }
    }
}

/// A quantity of some asset on some ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Ledger the asset lives on.
    pub ledger: LedgerKind,
    /// Unit of the quantity.
    pub kind: AssetKind,
    /// Amount in base units (sats, wei, token units).
    pub quantity: u128,
    /// Token contract address, erc20 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_contract: Option<String>,
}

impl Asset {
    /// On-chain bitcoin, in satoshis.
    pub fn bitcoin(sats: u128) -> Self {
        Self {
            ledger: LedgerKind::Bitcoin,
            kind: AssetKind::Bitcoin,
            quantity: sats,
            token_contract: None,
        }
    }

    /// Bitcoin held by a lightning node, in satoshis.
    pub fn lightning_bitcoin(sats: u128) -> Self {
        Self {
            ledger: LedgerKind::Lightning,
            kind: AssetKind::Bitcoin,
            quantity: sats,
            token_contract: None,
        }
    }

    /// Ether, in wei.
    pub fn ether(wei: u128) -> Self {
        Self {
            ledger: LedgerKind::Ethereum,
            kind: AssetKind::Ether,
            quantity: wei,
            token_contract: None,
        }
    }

    /// ERC20 tokens of the given contract.
    pub fn erc20(quantity: u128, token_contract: impl Into<String>) -> Self {
        Self {
            ledger: LedgerKind::Ethereum,
            kind: AssetKind::Erc20,
            quantity,
            token_contract: Some(token_contract.into()),
        }
    }

    /// Same asset with a different quantity.
    pub fn with_quantity(&self, quantity: u128) -> Self {
        Self {
            quantity,
            ..self.clone()
        }
    }

    /// Key used for balance bookkeeping.
    pub fn key(&self) -> AssetKey {
        AssetKey {
            ledger: self.ledger,
            kind: self.kind,
        }
    }

    /// Check the asset can take part in a swap.
    ///
    /// A zero quantity is rejected rather than treated as "nothing to track".
    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(HarnessError::invalid_data(
                format!("{} quantity", self.key()),
                "must be greater than zero",
            ));
        }
        match (self.kind, &self.token_contract) {
            (AssetKind::Erc20, None) => Err(HarnessError::invalid_data(
                "token_contract",
                "erc20 assets need a token contract",
            )),
            (AssetKind::Erc20, Some(_)) if self.ledger != LedgerKind::Ethereum => Err(
                HarnessError::invalid_data("ledger", "erc20 assets live on ethereum"),
            ),
            (AssetKind::Ether, _) if self.ledger != LedgerKind::Ethereum => Err(
                HarnessError::invalid_data("ledger", "ether lives on ethereum"),
            ),
            (AssetKind::Bitcoin, _) if self.ledger == LedgerKind::Ethereum => Err(
                HarnessError::invalid_data("ledger", "bitcoin cannot live on ethereum"),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.key())
    }
}

/// Stable bookkeeping key: one balance per (ledger, asset kind).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey {
    /// Ledger of the asset.
    pub ledger: LedgerKind,
    /// Kind of the asset.
    pub kind: AssetKind,
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger.as_str(), self.kind.as_str())
    }
}
