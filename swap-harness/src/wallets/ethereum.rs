//! Ethereum wallet with local signing, and the dev-account faucet.

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use super::eth_tx::{
    address_of, decode_hex, parse_address, parse_quantity, random_signing_key, to_quantity,
    LegacyTransaction,
};
use super::{poll_until_balance, MintPolling, TransactionLocks, Wallet};
use crate::asset::{Asset, AssetKind, LedgerKind};
use crate::ledgers::EthereumNodeConfig;
use crate::lock::RetryPolicy;
use crate::rpc::JsonRpcClient;
use crate::{HarnessError, Result};

/// Init code of the ERC20 token deployed during warm-up.
const ERC20_CONTRACT: &str = include_str!("../../contracts/erc20.hex");

/// `mint(address,uint256)`.
const MINT_SELECTOR: &str = "40c10f19";

/// `balanceOf(address)`.
const BALANCE_OF_SELECTOR: &str = "70a08231";

/// Lock key shared by every process sending from the dev account.
pub const DEV_ACCOUNT_LOCK: &str = "ethereum-dev-account";

const DEPLOY_GAS_LIMIT: u64 = 0x3D0900;
const MINT_GAS_LIMIT: u64 = 0x100000;
const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Ether a wallet is topped up with so it can pay gas for token transfers.
const GAS_ALLOWANCE_WEI: u128 = 1_000_000_000_000_000_000;

/// How long to wait for a transaction to be mined.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(30);
const RECEIPT_INTERVAL: Duration = Duration::from_millis(200);

/// Receipt of a mined transaction.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub transaction_hash: String,
    /// `0x1` on success, `0x0` on revert.
    #[serde(default)]
    pub status: Option<String>,
    /// Address of a created contract.
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Block the transaction was mined in.
    #[serde(default)]
    pub block_number: Option<String>,
}

impl TransactionReceipt {
    /// Whether the transaction executed without reverting.
    pub fn is_success(&self) -> bool {
        !matches!(self.status.as_deref(), Some("0x0") | Some("0x"))
    }

    fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            tracing::debug!(tx = %self.transaction_hash, block = ?self.block_number, "transaction confirmed");
            Ok(self)
        } else {
            Err(HarnessError::TransactionFailed {
                tx_id: self.transaction_hash,
            })
        }
    }
}

/// Poll for the receipt of `tx_hash`.
pub async fn wait_for_receipt(rpc: &JsonRpcClient, tx_hash: &str) -> Result<TransactionReceipt> {
    let deadline = Instant::now() + RECEIPT_TIMEOUT;
    loop {
        let receipt: Option<TransactionReceipt> = rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if let Some(receipt) = receipt {
            return Ok(receipt);
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::timeout(
                format!("receipt for {}", tx_hash),
                RECEIPT_TIMEOUT,
            ));
        }
        tokio::time::sleep(RECEIPT_INTERVAL).await;
    }
}

/// ABI-encode a call taking one address (and optionally one uint256).
fn encode_call(selector: &str, address: &str, amount: Option<u128>) -> String {
    let mut data = format!(
        "0x{}{:0>64}",
        selector,
        address.trim_start_matches("0x").to_lowercase()
    );
    if let Some(amount) = amount {
        data.push_str(&format!("{:064x}", amount));
    }
    data
}

// ============================================================================
// Faucet
// ============================================================================

/// Sends transactions from geth's pre-funded dev account.
///
/// The node signs (`eth_sendTransaction`), so the nonce is assigned by geth;
/// the account lock still keeps transactions from different processes from
/// racing for the same nonce.
#[derive(Clone, Debug)]
pub struct EthereumFaucet {
    rpc: JsonRpcClient,
    dev_account: String,
    chain_id: u64,
    locks: TransactionLocks,
}

impl EthereumFaucet {
    /// Faucet sending from `dev_account`.
    pub fn new(rpc: JsonRpcClient, dev_account: impl Into<String>, chain_id: u64) -> Self {
        Self {
            rpc,
            dev_account: dev_account.into(),
            chain_id,
            locks: TransactionLocks::in_process(),
        }
    }

    /// Faucet for the node described by `config`.
    pub fn from_config(config: &EthereumNodeConfig, locks: TransactionLocks) -> Result<Self> {
        let rpc = JsonRpcClient::new(&config.rpc_url, config.timeout_secs)?;
        Ok(Self::new(rpc, &config.dev_account, config.chain_id).with_locks(locks))
    }

    /// Share the dev-account lock with other processes through `dir`.
    pub fn with_locks_dir(self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.with_locks(TransactionLocks::new(dir).with_policy(RetryPolicy::account()))
    }

    /// Use `locks` for the dev account.
    pub fn with_locks(mut self, locks: TransactionLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Dev account address.
    pub fn dev_account(&self) -> &str {
        &self.dev_account
    }

    /// Deploy the ERC20 token contract and return its address.
    pub async fn deploy_erc20_token_contract(&self) -> Result<String> {
        let receipt = self
            .send_dev_account_transaction(json!({
                "from": self.dev_account,
                "gas": to_quantity(DEPLOY_GAS_LIMIT as u128),
                "value": "0x0",
                "data": format!("0x{}", ERC20_CONTRACT.trim()),
            }))
            .await?;

        receipt
            .contract_address
            .ok_or_else(|| HarnessError::invalid_data("receipt", "no contract address"))
    }

    /// Send `wei` to `to`.
    pub async fn mint_ether(&self, to: &str, wei: u128) -> Result<()> {
        self.send_dev_account_transaction(json!({
            "from": self.dev_account,
            "to": to,
            "gas": to_quantity(TRANSFER_GAS_LIMIT as u128),
            "value": to_quantity(wei),
        }))
        .await?;
        tracing::info!(wei, to, "minted ether");
        Ok(())
    }

    /// Mint `quantity` tokens of `token_contract` to `to`.
    pub async fn mint_erc20(&self, to: &str, quantity: u128, token_contract: &str) -> Result<()> {
        self.send_dev_account_transaction(json!({
            "from": self.dev_account,
            "to": token_contract,
            "gas": to_quantity(MINT_GAS_LIMIT as u128),
            "value": "0x0",
            "data": encode_call(MINT_SELECTOR, to, Some(quantity)),
        }))
        .await?;
        tracing::info!(quantity, token_contract, to, "minted erc20 tokens");
        Ok(())
    }

    async fn send_dev_account_transaction(
        &self,
        tx: serde_json::Value,
    ) -> Result<TransactionReceipt> {
        let _lock = self.locks.lock(DEV_ACCOUNT_LOCK).await?;
        tracing::debug!(chain_id = self.chain_id, "acquired dev account lock, sending transaction");

        let tx_hash: String = self.rpc.call("eth_sendTransaction", json!([tx])).await?;
        wait_for_receipt(&self.rpc, &tx_hash).await?.ensure_success()
    }
}

// ============================================================================
// Wallet
// ============================================================================

/// A random account signing its own transactions.
pub struct EthereumWallet {
    rpc: JsonRpcClient,
    key: SigningKey,
    account: String,
    chain_id: u64,
    faucet: EthereumFaucet,
    locks: TransactionLocks,
    polling: MintPolling,
}

impl std::fmt::Debug for EthereumWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthereumWallet")
            .field("account", &self.account)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl EthereumWallet {
    /// Create a wallet with a fresh key on the node described by `config`.
    pub fn new_instance(
        config: &EthereumNodeConfig,
        faucet: EthereumFaucet,
        locks: TransactionLocks,
    ) -> Result<Self> {
        let rpc = JsonRpcClient::new(&config.rpc_url, config.timeout_secs)?;
        let key = random_signing_key()?;
        let account = address_of(&key);
        tracing::info!(account = %account, "created ethereum wallet");

        Ok(Self {
            rpc,
            key,
            account,
            chain_id: config.chain_id,
            faucet,
            locks,
            polling: MintPolling::default(),
        })
    }

    /// Override the mint polling bounds.
    pub fn with_mint_polling(mut self, polling: MintPolling) -> Self {
        self.polling = polling;
        self
    }

    /// Account address.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Chain id this wallet signs for.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Deploy a contract with `value` wei attached.
    pub async fn deploy_contract(
        &self,
        data: &str,
        value: u128,
        gas_limit: u64,
        chain_id: u64,
    ) -> Result<TransactionReceipt> {
        self.assert_network(chain_id).await?;
        self.sign_and_send(None, value, decode_hex("data", data)?, gas_limit)
            .await
    }

    /// Call `contract_address` with `data`.
    pub async fn call_contract(
        &self,
        data: &str,
        contract_address: &str,
        gas_limit: u64,
        chain_id: u64,
    ) -> Result<TransactionReceipt> {
        self.assert_network(chain_id).await?;
        self.sign_and_send(
            Some(parse_address(contract_address)?),
            0,
            decode_hex("data", data)?,
            gas_limit,
        )
        .await
    }

    /// Fail unless the node runs chain `expected_chain_id`.
    pub async fn assert_network(&self, expected_chain_id: u64) -> Result<()> {
        let actual = crate::ledgers::geth::fetch_chain_id(&self.rpc).await?;
        if actual != expected_chain_id {
            return Err(HarnessError::invalid_data(
                "chain_id",
                format!(
                    "wallet is connected to chain {} and cannot act on chain {}",
                    actual, expected_chain_id
                ),
            ));
        }
        Ok(())
    }

    /// Token balance held at `contract`.
    pub async fn get_erc20_balance(&self, contract: &str) -> Result<u128> {
        let result: String = self
            .rpc
            .call(
                "eth_call",
                json!([{ "to": contract, "data": encode_call(BALANCE_OF_SELECTOR, &self.account, None) }, "latest"]),
            )
            .await?;

        let digits = result.trim_start_matches("0x");
        // uint256 results are 32 bytes; anything above u128 is not a test balance
        let digits = digits.trim_start_matches('0');
        parse_quantity("balanceOf", &format!("0x{}", digits))
    }

    /// Ether balance in wei.
    pub async fn get_ether_balance(&self) -> Result<u128> {
        let result: String = self
            .rpc
            .call("eth_getBalance", json!([self.account, "latest"]))
            .await?;
        parse_quantity("eth_getBalance", &result)
    }

    async fn sign_and_send(
        &self,
        to: Option<[u8; 20]>,
        value: u128,
        data: Vec<u8>,
        gas_limit: u64,
    ) -> Result<TransactionReceipt> {
        let _lock = self.locks.lock(&self.account).await?;

        let nonce: String = self
            .rpc
            .call("eth_getTransactionCount", json!([self.account, "pending"]))
            .await?;
        let gas_price: String = self.rpc.call("eth_gasPrice", json!([])).await?;

        let tx = LegacyTransaction {
            nonce: parse_quantity("nonce", &nonce)? as u64,
            gas_price: parse_quantity("gas_price", &gas_price)?,
            gas_limit,
            to,
            value,
            data,
            chain_id: self.chain_id,
        };
        let raw = tx.sign(&self.key)?;

        let tx_hash: String = self
            .rpc
            .call("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        tracing::debug!(tx = %tx_hash, nonce = tx.nonce, "transaction sent, waiting to be confirmed");

        wait_for_receipt(&self.rpc, &tx_hash).await?.ensure_success()
    }

    fn token_contract<'a>(&self, asset: &'a Asset) -> Result<&'a str> {
        asset
            .token_contract
            .as_deref()
            .ok_or_else(|| HarnessError::invalid_data("token_contract", "erc20 asset without contract"))
    }

    fn unsupported(&self, asset: &Asset) -> HarnessError {
        HarnessError::UnsupportedAsset {
            wallet: LedgerKind::Ethereum.to_string(),
            asset: asset.to_string(),
        }
    }
}

#[async_trait]
impl Wallet for EthereumWallet {
    fn ledger(&self) -> LedgerKind {
        LedgerKind::Ethereum
    }

    fn maximum_fee(&self) -> u128 {
        // gas is paid in ether, swapped assets are tracked separately
        0
    }

    async fn mint(&self, asset: &Asset) -> Result<()> {
        if asset.ledger != LedgerKind::Ethereum {
            return Err(self.unsupported(asset));
        }

        let starting = self.get_balance_by_asset(asset).await?;
        match asset.kind {
            AssetKind::Ether => {
                // keep headroom for gas
                self.faucet
                    .mint_ether(&self.account, asset.quantity.saturating_mul(2))
                    .await?;
            }
            AssetKind::Erc20 => {
                if self.get_ether_balance().await? < GAS_ALLOWANCE_WEI {
                    self.faucet.mint_ether(&self.account, GAS_ALLOWANCE_WEI).await?;
                }
                self.faucet
                    .mint_erc20(&self.account, asset.quantity, self.token_contract(asset)?)
                    .await?;
            }
            AssetKind::Bitcoin => return Err(self.unsupported(asset)),
        }

        poll_until_balance(
            &asset.key().to_string(),
            starting.saturating_add(asset.quantity),
            self.polling,
            || self.get_balance_by_asset(asset),
        )
        .await
    }

    async fn get_balance_by_asset(&self, asset: &Asset) -> Result<u128> {
        match (asset.ledger, asset.kind) {
            (LedgerKind::Ethereum, AssetKind::Ether) => self.get_ether_balance().await,
            (LedgerKind::Ethereum, AssetKind::Erc20) => {
                self.get_erc20_balance(self.token_contract(asset)?).await
            }
            _ => Err(self.unsupported(asset)),
        }
    }

    async fn get_blockchain_time(&self) -> Result<u64> {
        let block: serde_json::Value = self
            .rpc
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let timestamp = block["timestamp"]
            .as_str()
            .ok_or_else(|| HarnessError::invalid_data("timestamp", "missing from latest block"))?;
        Ok(parse_quantity("timestamp", timestamp)? as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_call_data() {
        let data = encode_call(
            MINT_SELECTOR,
            "0x0896F60D2A3F0487F293959A84CF1E9BC2597727",
            Some(1000),
        );
        assert_eq!(
            data,
            "0x40c10f19\
             0000000000000000000000000896f60d2a3f0487f293959a84cf1e9bc2597727\
             00000000000000000000000000000000000000000000000000000000000003e8"
        );
    }

    #[test]
    fn test_receipt_status() {
        let ok: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc", "status": "0x1", "blockNumber": "0x10"
        }))
        .unwrap();
        assert!(ok.is_success());

        let reverted: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0xdef", "status": "0x0"
        }))
        .unwrap();
        match reverted.ensure_success() {
            Err(HarnessError::TransactionFailed { tx_id }) => assert_eq!(tx_id, "0xdef"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_contract_bytecode_is_hex() {
        assert!(hex::decode(ERC20_CONTRACT.trim()).is_ok());
    }
}
