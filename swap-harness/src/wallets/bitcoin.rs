//! bitcoind-backed wallet and faucet.

use async_trait::async_trait;
use serde_json::json;

use super::{poll_until_balance, MintPolling, Wallet};
use crate::asset::{Asset, AssetKind, LedgerKind};
use crate::ledgers::bitcoind::{assert_network, COINBASE_MATURITY};
use crate::ledgers::{BitcoinNetwork, BitcoinNodeConfig};
use crate::rpc::JsonRpcClient;
use crate::{HarnessError, Result};

/// Fees a single swap may cost a bitcoin wallet, in satoshis.
pub const BITCOIN_MAXIMUM_FEE: u128 = 100_000;

/// Fee rate handed to the daemon for `bitcoin` + `feePerWU` fields.
pub const DEFAULT_FEE_PER_WU: &str = "150";

const SATS_PER_BTC: u128 = 100_000_000;

/// Render satoshis as a BTC decimal string.
pub fn sats_to_btc(sats: u128) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Convert a BTC amount reported by bitcoind to satoshis.
pub fn btc_to_sats(btc: f64) -> Result<u128> {
    if !btc.is_finite() || btc < 0.0 {
        return Err(HarnessError::invalid_data(
            "amount",
            format!("{} is not a valid BTC amount", btc),
        ));
    }
    Ok((btc * SATS_PER_BTC as f64).round() as u128)
}

// ============================================================================
// Faucet
// ============================================================================

/// Sends coins from the miner wallet.
#[derive(Clone, Debug)]
pub struct BitcoinFaucet {
    miner: JsonRpcClient,
}

impl BitcoinFaucet {
    /// Faucet for the node described by `config`.
    pub fn new(config: &BitcoinNodeConfig) -> Result<Self> {
        let rpc = JsonRpcClient::bitcoind(
            config.rpc_url(),
            &config.username,
            &config.password,
            config.timeout_secs,
        )?;
        Ok(Self {
            miner: rpc.with_path(&format!("wallet/{}", config.miner_wallet)),
        })
    }

    /// Send `sats` to `address`, returning the transaction id.
    ///
    /// Fails while coinbase outputs are still immature.
    pub async fn mint_to_address(&self, sats: u128, address: &str) -> Result<String> {
        let height: u64 = self.miner.call("getblockcount", json!([])).await?;
        if height < COINBASE_MATURITY {
            return Err(HarnessError::invalid_data(
                "block height",
                format!(
                    "unable to mint bitcoin at height {}, coinbase outputs are not yet spendable",
                    height
                ),
            ));
        }

        let btc = sats_to_btc(sats);
        let txid: String = self
            .miner
            .call("sendtoaddress", json!([address, btc]))
            .await?;
        tracing::info!(btc = %btc, address, txid = %txid, "minted bitcoin");
        Ok(txid)
    }
}

// ============================================================================
// Wallet
// ============================================================================

/// A fresh named wallet inside the shared bitcoind.
#[derive(Debug)]
pub struct BitcoindWallet {
    name: String,
    rpc: JsonRpcClient,
    faucet: BitcoinFaucet,
    polling: MintPolling,
}

impl BitcoindWallet {
    /// Create a wallet with a random name on the node described by `config`.
    pub async fn new_instance(config: &BitcoinNodeConfig, faucet: BitcoinFaucet) -> Result<Self> {
        let rpc = JsonRpcClient::bitcoind(
            config.rpc_url(),
            &config.username,
            &config.password,
            config.timeout_secs,
        )?;
        let name = hex::encode(rand::random::<[u8; 32]>());

        let _: serde_json::Value = rpc.call("createwallet", json!([name])).await?;
        tracing::info!(wallet = %name, "created bitcoin wallet");

        Ok(Self {
            rpc: rpc.with_path(&format!("wallet/{}", name)),
            name,
            faucet,
            polling: MintPolling::default(),
        })
    }

    /// Override the mint polling bounds.
    pub fn with_mint_polling(mut self, polling: MintPolling) -> Self {
        self.polling = polling;
        self
    }

    /// Wallet name inside bitcoind.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A fresh bech32 receive address.
    pub async fn get_address(&self) -> Result<String> {
        self.rpc.call("getnewaddress", json!(["", "bech32"])).await
    }

    /// Trusted balance in satoshis.
    pub async fn get_balance(&self) -> Result<u128> {
        let btc: f64 = self.rpc.call("getbalance", json!([])).await?;
        btc_to_sats(btc)
    }

    /// Pay `sats` to `address` on `network`.
    pub async fn send_to_address(
        &self,
        address: &str,
        sats: u128,
        network: BitcoinNetwork,
    ) -> Result<String> {
        assert_network(&self.rpc, network).await?;
        self.rpc
            .call("sendtoaddress", json!([address, sats_to_btc(sats)]))
            .await
    }

    /// Broadcast a fully signed transaction on `network`.
    pub async fn broadcast_transaction(
        &self,
        transaction_hex: &str,
        network: BitcoinNetwork,
    ) -> Result<String> {
        assert_network(&self.rpc, network).await?;
        self.rpc
            .call("sendrawtransaction", json!([transaction_hex]))
            .await
    }

    /// Fee rate in sat/WU.
    pub fn get_fee(&self) -> &'static str {
        // a real wallet would use `estimatesmartfee`
        DEFAULT_FEE_PER_WU
    }

    fn ensure_supported(&self, asset: &Asset) -> Result<()> {
        if asset.ledger == LedgerKind::Bitcoin && asset.kind == AssetKind::Bitcoin {
            Ok(())
        } else {
            Err(HarnessError::UnsupportedAsset {
                wallet: LedgerKind::Bitcoin.to_string(),
                asset: asset.to_string(),
            })
        }
    }
}

#[async_trait]
impl Wallet for BitcoindWallet {
    fn ledger(&self) -> LedgerKind {
        LedgerKind::Bitcoin
    }

    fn maximum_fee(&self) -> u128 {
        BITCOIN_MAXIMUM_FEE
    }

    async fn mint(&self, asset: &Asset) -> Result<()> {
        self.ensure_supported(asset)?;

        let starting = self.get_balance().await?;
        let address = self.get_address().await?;
        self.faucet.mint_to_address(asset.quantity, &address).await?;

        poll_until_balance(
            &asset.key().to_string(),
            starting.saturating_add(asset.quantity),
            self.polling,
            || self.get_balance(),
        )
        .await
    }

    async fn get_balance_by_asset(&self, asset: &Asset) -> Result<u128> {
        self.ensure_supported(asset)?;
        self.get_balance().await
    }

    async fn get_blockchain_time(&self) -> Result<u64> {
        let info: serde_json::Value = self.rpc.call("getblockchaininfo", json!([])).await?;
        info["mediantime"]
            .as_u64()
            .ok_or_else(|| HarnessError::invalid_data("mediantime", "missing from getblockchaininfo"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sats_to_btc() {
        assert_eq!(sats_to_btc(100_000_000), "1.00000000");
        assert_eq!(sats_to_btc(1), "0.00000001");
        assert_eq!(sats_to_btc(1_000_000_000), "10.00000000");
    }

    #[test]
    fn test_btc_to_sats_rejects_garbage() {
        assert_eq!(btc_to_sats(0.001).unwrap(), 100_000);
        assert!(btc_to_sats(-1.0).is_err());
        assert!(btc_to_sats(f64::NAN).is_err());
    }

    proptest! {
        #[test]
        fn prop_btc_string_round_trips(sats in 0u128..2_100_000_000_000_000) {
            let btc: f64 = sats_to_btc(sats).parse().unwrap();
            prop_assert_eq!(btc_to_sats(btc).unwrap(), sats);
        }
    }
}
