//! Regtest bitcoind instance.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::config::{BitcoinNetwork, BitcoinNodeConfig};
use super::LedgerInstance;
use crate::process::{find_binary, free_port, LogWatcher, ManagedProcess, ProcessSpec};
use crate::rpc::JsonRpcClient;
use crate::{HarnessError, Result};

/// Environment variable overriding the bitcoind binary.
pub const BITCOIND_BIN_ENV: &str = "BITCOIND_BIN";

/// Log line bitcoind writes once RPC is usable.
const READY_MARKER: &str = "init message: Done loading";

/// Coinbase outputs become spendable after this many blocks.
pub const COINBASE_MATURITY: u64 = 101;

/// bitcoind wallet error: "Database already exists".
const RPC_WALLET_ERROR: i64 = -4;

/// bitcoind wallet error: "Wallet file verification failed" / already loaded.
const RPC_WALLET_ALREADY_LOADED: i64 = -35;

/// A bitcoind process on regtest.
#[derive(Debug)]
pub struct BitcoindInstance {
    data_dir: PathBuf,
    binary: PathBuf,
    p2p_port: u16,
    rpc_port: u16,
    zmq_block_port: u16,
    zmq_tx_port: u16,
    startup_timeout: Duration,
    block_interval: Duration,
    process: Option<ManagedProcess>,
    credentials: Option<(String, String)>,
    miner: Option<BlockMiner>,
}

impl BitcoindInstance {
    /// Prepare an instance storing its chain in `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_binary(find_binary("bitcoind", BITCOIND_BIN_ENV)?, data_dir)
    }

    /// Prepare an instance running `binary`.
    pub fn with_binary(binary: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let binary = binary.into();
        Ok(Self {
            data_dir: data_dir.into(),
            binary,
            p2p_port: free_port(Some(18444))?,
            rpc_port: free_port(Some(18443))?,
            zmq_block_port: free_port(Some(28332))?,
            zmq_tx_port: free_port(Some(28333))?,
            startup_timeout: Duration::from_secs(30),
            block_interval: Duration::from_secs(1),
            process: None,
            credentials: None,
            miner: None,
        })
    }

    /// Set how long to wait for the readiness marker.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set how often the background miner produces a block.
    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    fn debug_log(&self) -> PathBuf {
        self.data_dir.join("regtest").join("debug.log")
    }

    fn config(&self) -> Result<BitcoinNodeConfig> {
        let (username, password) = self
            .credentials
            .clone()
            .ok_or_else(|| HarnessError::invalid_data("bitcoind", "not started"))?;

        Ok(BitcoinNodeConfig::new("127.0.0.1", self.rpc_port, username, password)
            .with_p2p_port(self.p2p_port)
            .with_zmq_ports(self.zmq_block_port, self.zmq_tx_port)
            .with_data_dir(&self.data_dir))
    }

    fn conf_file_contents(&self) -> String {
        format!(
            "regtest=1
server=1
rpcallowip=0.0.0.0/0
debug=1
rest=1
acceptnonstdtxn=0
zmqpubrawblock=tcp://127.0.0.1:{zmq_block}
zmqpubrawtx=tcp://127.0.0.1:{zmq_tx}
fallbackfee=0.0002
txindex=1

[regtest]
bind=0.0.0.0:{p2p}
rpcbind=0.0.0.0:{rpc}
",
            zmq_block = self.zmq_block_port,
            zmq_tx = self.zmq_tx_port,
            p2p = self.p2p_port,
            rpc = self.rpc_port,
        )
    }
}

#[async_trait]
impl LedgerInstance for BitcoindInstance {
    type Config = BitcoinNodeConfig;

    fn name(&self) -> &str {
        "bitcoind"
    }

    async fn start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.data_dir.join("bitcoin.conf"), self.conf_file_contents())?;

        let mut watcher = LogWatcher::from_end(&self.debug_log());
        let spec = ProcessSpec::new("bitcoind", &self.binary, self.data_dir.join("bitcoind.log"))
            .arg(format!("-datadir={}", self.data_dir.display()))
            .with_cwd(&self.data_dir);
        let mut process = ManagedProcess::spawn(spec)?;

        watcher
            .wait_for(&mut process, READY_MARKER, self.startup_timeout)
            .await?;

        self.credentials = Some(read_cookie(&self.data_dir.join("regtest").join(".cookie"))?);
        tracing::info!(pid = process.pid(), rpc_port = self.rpc_port, "bitcoind started");
        self.process = Some(process);
        Ok(())
    }

    async fn warm_up(&mut self) -> Result<BitcoinNodeConfig> {
        let config = self.config()?;
        let rpc = JsonRpcClient::bitcoind(
            config.rpc_url(),
            &config.username,
            &config.password,
            config.timeout_secs,
        )?;

        ensure_wallet(&rpc, &config.miner_wallet).await?;
        tracing::info!(wallet = %config.miner_wallet, "created miner wallet");

        let miner_rpc = rpc.with_path(&format!("wallet/{}", config.miner_wallet));
        let address: String = miner_rpc.call("getnewaddress", json!([])).await?;
        let _: Vec<String> = miner_rpc
            .call("generatetoaddress", json!([COINBASE_MATURITY, address]))
            .await?;
        tracing::info!(blocks = COINBASE_MATURITY, "mined initial blocks");

        self.miner = Some(BlockMiner::spawn(miner_rpc, address, self.block_interval));
        Ok(config)
    }

    fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ManagedProcess::pid)
    }

    async fn stop(&mut self) {
        self.miner = None;
        if let Some(mut process) = self.process.take() {
            process.stop().await;
        }
    }
}

/// Create `name`, or load it if it exists from a previous run.
async fn ensure_wallet(rpc: &JsonRpcClient, name: &str) -> Result<()> {
    match rpc.call::<serde_json::Value>("createwallet", json!([name])).await {
        Ok(_) => Ok(()),
        Err(HarnessError::Rpc { code, .. }) if code == RPC_WALLET_ERROR => {
            match rpc.call::<serde_json::Value>("loadwallet", json!([name])).await {
                Ok(_) => Ok(()),
                Err(HarnessError::Rpc { code, .. }) if code == RPC_WALLET_ALREADY_LOADED => Ok(()),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Parse bitcoind's `.cookie` file (`user:password`).
pub fn read_cookie(path: &Path) -> Result<(String, String)> {
    let content = std::fs::read_to_string(path)?;
    content
        .trim()
        .split_once(':')
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
        .ok_or_else(|| HarnessError::invalid_data("cookie", "expected user:password"))
}

/// Check that the node behind `rpc` runs on `network`.
pub async fn assert_network(rpc: &JsonRpcClient, network: BitcoinNetwork) -> Result<()> {
    let info: serde_json::Value = rpc.call("getblockchaininfo", json!([])).await?;
    let chain = info["chain"].as_str().unwrap_or_default();

    if chain != network.chain_name() {
        return Err(HarnessError::invalid_data(
            "network",
            format!(
                "wallet is connected to {} and cannot act on {}",
                chain,
                network.chain_name()
            ),
        ));
    }
    Ok(())
}

/// Background task producing one block per interval.
///
/// Aborted when dropped.
#[derive(Debug)]
pub struct BlockMiner {
    handle: JoinHandle<()>,
}

impl BlockMiner {
    /// Start mining to `address`.
    pub fn spawn(rpc: JsonRpcClient, address: String, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = rpc
                    .call::<Vec<String>>("generatetoaddress", json!([1, address]))
                    .await
                {
                    tracing::debug!(error = %e, "failed to mine block");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for BlockMiner {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
