//! geth dev-chain instance.

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

use super::config::{EthereumNodeConfig, DEV_CHAIN_ID};
use super::LedgerInstance;
use crate::process::{find_binary, free_port, ManagedProcess, ProcessSpec};
use crate::rpc::JsonRpcClient;
use crate::wallets::ethereum::EthereumFaucet;
use crate::{HarnessError, Result};

/// Environment variable overriding the geth binary.
pub const GETH_BIN_ENV: &str = "GETH_BIN";

/// Logged by the dev-mode sealer for every block.
const READY_MARKER: &str = "mined potential block";

/// A geth process in `--dev` mode sealing a block per second.
#[derive(Debug)]
pub struct GethInstance {
    data_dir: PathBuf,
    binary: PathBuf,
    rpc_port: u16,
    p2p_port: u16,
    startup_timeout: Duration,
    process: Option<ManagedProcess>,
    locks_dir: Option<PathBuf>,
}

impl GethInstance {
    /// Prepare an instance storing its chain in `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_binary(find_binary("geth", GETH_BIN_ENV)?, data_dir)
    }

    /// Prepare an instance running `binary`.
    pub fn with_binary(binary: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let binary = binary.into();
        Ok(Self {
            data_dir: data_dir.into(),
            binary,
            rpc_port: free_port(Some(8545))?,
            p2p_port: free_port(None)?,
            startup_timeout: Duration::from_secs(30),
            process: None,
            locks_dir: None,
        })
    }

    /// Set how long to wait for the readiness marker.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Directory holding the dev-account transaction lock.
    pub fn with_locks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.locks_dir = Some(dir.into());
        self
    }

    /// JSON-RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rpc_port)
    }
}

#[async_trait]
impl LedgerInstance for GethInstance {
    type Config = EthereumNodeConfig;

    fn name(&self) -> &str {
        "geth"
    }

    async fn start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;

        let spec = ProcessSpec::new("geth", &self.binary, self.data_dir.join("geth.log"))
            .arg("--dev")
            .arg("--dev.period=1")
            .arg(format!("--datadir={}", self.data_dir.display()))
            .arg(format!("--networkid={}", DEV_CHAIN_ID))
            .arg("--http")
            .arg("--http.addr=127.0.0.1")
            .arg(format!("--http.port={}", self.rpc_port))
            .arg("--http.api=eth,net,web3")
            .arg(format!("--port={}", self.p2p_port))
            .arg("--nodiscover")
            .with_cwd(&self.data_dir);
        let mut process = ManagedProcess::spawn(spec)?;

        process
            .wait_for_log_message(READY_MARKER, self.startup_timeout)
            .await?;

        tracing::info!(pid = process.pid(), rpc_port = self.rpc_port, "geth started");
        self.process = Some(process);
        Ok(())
    }

    async fn warm_up(&mut self) -> Result<EthereumNodeConfig> {
        let rpc = JsonRpcClient::new(self.rpc_url(), 30)?;

        let accounts: Vec<String> = rpc.call("eth_accounts", json!([])).await?;
        let dev_account = accounts
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::invalid_data("eth_accounts", "dev account missing"))?;

        let chain_id = fetch_chain_id(&rpc).await?;
        let mut faucet = EthereumFaucet::new(rpc, &dev_account, chain_id);
        if let Some(dir) = &self.locks_dir {
            faucet = faucet.with_locks_dir(dir);
        }
        let token_contract = faucet.deploy_erc20_token_contract().await?;
        tracing::info!(contract = %token_contract, "ERC20 token contract deployed");

        Ok(EthereumNodeConfig::new(self.rpc_url(), dev_account)
            .with_chain_id(chain_id)
            .with_token_contract(token_contract)
            .with_data_dir(&self.data_dir))
    }

    fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ManagedProcess::pid)
    }

    async fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.stop().await;
        }
    }
}

/// `eth_chainId` as a number.
pub async fn fetch_chain_id(rpc: &JsonRpcClient) -> Result<u64> {
    let hex: String = rpc.call("eth_chainId", json!([])).await?;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| HarnessError::invalid_data("eth_chainId", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_chain_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_chainId", "jsonrpc": "2.0" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x539"
            })))
            .mount(&server)
            .await;

        let rpc = JsonRpcClient::new(server.uri(), 5).unwrap();
        assert_eq!(fetch_chain_id(&rpc).await.unwrap(), DEV_CHAIN_ID);
    }
}
