//! Regtest lnd instance backed by the shared bitcoind.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use super::config::{BitcoinNodeConfig, LightningNodeConfig};
use super::LedgerInstance;
use crate::process::{
    find_binary, free_port, wait_until_file_exists, LogWatcher, ManagedProcess, ProcessSpec,
};
use crate::wallets::lightning::LndClient;
use crate::wallets::{poll_until_balance, BitcoinFaucet, MintPolling};
use crate::{HarnessError, Result};

/// Environment variable overriding the lnd binary.
pub const LND_BIN_ENV: &str = "LND_BIN";

/// Wallet unlocker is up; the wallet can be created.
const PASSWORD_RPC_MARKER: &str = "RPCS: password RPC server listening";

/// Main RPC server is up; the wallet is unlocked.
const RPC_MARKER: &str = "RPCS: RPC server listening";

/// P2P server is up; peers can connect.
const P2P_MARKER: &str = "BTCN: Server listening on";

/// Password of the node wallet.
const WALLET_PASSWORD: &str = "password";

/// On-chain funds every node starts with, in satoshis.
const INITIAL_FUNDING: u128 = 1_000_000_000;

/// Ports of one lnd node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LndPorts {
    p2p: u16,
    grpc: u16,
    rest: u16,
}

/// An lnd process on regtest.
#[derive(Debug)]
pub struct LndInstance {
    name: String,
    data_dir: PathBuf,
    binary: PathBuf,
    bitcoin: BitcoinNodeConfig,
    ports: LndPorts,
    startup_timeout: Duration,
    process: Option<ManagedProcess>,
    p2p_watcher: Option<LogWatcher>,
}

impl LndInstance {
    /// Prepare an instance named `name` (e.g. "lnd-alice") in `data_dir`,
    /// using the node described by `bitcoin` as its chain backend.
    pub fn new(
        name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        bitcoin: BitcoinNodeConfig,
    ) -> Result<Self> {
        Self::with_binary(find_binary("lnd", LND_BIN_ENV)?, name, data_dir, bitcoin)
    }

    /// Prepare an instance running `binary`.
    pub fn with_binary(
        binary: impl Into<PathBuf>,
        name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        bitcoin: BitcoinNodeConfig,
    ) -> Result<Self> {
        let binary = binary.into();
        Ok(Self {
            name: name.into(),
            data_dir: data_dir.into(),
            binary,
            bitcoin,
            ports: LndPorts {
                p2p: free_port(None)?,
                grpc: free_port(None)?,
                rest: free_port(None)?,
            },
            startup_timeout: Duration::from_secs(60),
            process: None,
            p2p_watcher: None,
        })
    }

    /// Set how long to wait for each readiness marker.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    fn log_file(&self) -> PathBuf {
        self.data_dir
            .join("logs")
            .join("bitcoin")
            .join("regtest")
            .join("lnd.log")
    }

    fn tls_cert_path(&self) -> PathBuf {
        self.data_dir.join("tls.cert")
    }

    fn macaroon_path(&self) -> PathBuf {
        self.data_dir
            .join("data")
            .join("chain")
            .join("bitcoin")
            .join("regtest")
            .join("admin.macaroon")
    }

    fn config(&self) -> LightningNodeConfig {
        LightningNodeConfig::new(format!("https://localhost:{}", self.ports.rest))
            .with_p2p_socket(format!("127.0.0.1:{}", self.ports.p2p))
            .with_grpc_socket(format!("127.0.0.1:{}", self.ports.grpc))
            .with_tls_cert(self.tls_cert_path())
            .with_macaroon(self.macaroon_path())
            .with_data_dir(&self.data_dir)
    }

    async fn wait_for(&mut self, watcher: &mut LogWatcher, marker: &str) -> Result<()> {
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| HarnessError::invalid_data(self.name.clone(), "not started"))?;
        watcher.wait_for(process, marker, self.startup_timeout).await
    }

    async fn init_wallet(&self) -> Result<()> {
        let client = LndClient::unauthenticated(
            &self.config().rest_url,
            Some(&self.tls_cert_path()),
            self.bitcoin.timeout_secs,
        )?;
        let mnemonic = client.gen_seed().await?;
        client.init_wallet(&mnemonic, WALLET_PASSWORD).await?;
        tracing::debug!(node = %self.name, "lnd wallet initialized");
        Ok(())
    }
}

fn conf_file_contents(ports: LndPorts, bitcoin: &BitcoinNodeConfig) -> String {
    format!(
        "[Application Options]
debuglevel=debug
maxpendingchannels=10
nobootstrap=1
listen=127.0.0.1:{p2p}
rpclisten=127.0.0.1:{grpc}
restlisten=127.0.0.1:{rest}

[Bitcoin]
bitcoin.active=true
bitcoin.regtest=true
bitcoin.node=bitcoind
bitcoin.defaultchanconfs=1

[Bitcoind]
bitcoind.rpchost={rpchost}
bitcoind.rpcuser={rpcuser}
bitcoind.rpcpass={rpcpass}
bitcoind.zmqpubrawblock={zmq_block}
bitcoind.zmqpubrawtx={zmq_tx}
",
        p2p = ports.p2p,
        grpc = ports.grpc,
        rest = ports.rest,
        rpchost = bitcoin.rpc_socket(),
        rpcuser = bitcoin.username,
        rpcpass = bitcoin.password,
        zmq_block = bitcoin.zmq_block_endpoint(),
        zmq_tx = bitcoin.zmq_tx_endpoint(),
    )
}

#[async_trait]
impl LedgerInstance for LndInstance {
    type Config = LightningNodeConfig;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(
            self.data_dir.join("lnd.conf"),
            conf_file_contents(self.ports, &self.bitcoin),
        )?;

        // one watcher per marker: lnd does not log them in a fixed order
        let log = self.log_file();
        let mut password_rpc = LogWatcher::from_end(&log);
        let mut rpc = password_rpc.clone();
        self.p2p_watcher = Some(password_rpc.clone());

        let spec = ProcessSpec::new("lnd", &self.binary, self.data_dir.join("lnd-stdout.log"))
            .arg(format!("--lnddir={}", self.data_dir.display()))
            .with_cwd(&self.data_dir);
        self.process = Some(ManagedProcess::spawn(spec)?);

        self.wait_for(&mut password_rpc, PASSWORD_RPC_MARKER).await?;
        self.init_wallet().await?;
        self.wait_for(&mut rpc, RPC_MARKER).await?;
        wait_until_file_exists(&self.macaroon_path(), self.startup_timeout).await?;

        tracing::info!(
            node = %self.name,
            pid = ?self.pid(),
            rest_port = self.ports.rest,
            "lnd started"
        );
        Ok(())
    }

    async fn warm_up(&mut self) -> Result<LightningNodeConfig> {
        let config = self.config();
        let client = LndClient::new(&config)?;
        let faucet = BitcoinFaucet::new(&self.bitcoin)?;

        let address = client.new_address().await?;
        faucet.mint_to_address(INITIAL_FUNDING, &address).await?;
        let polling = MintPolling {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(500),
        };
        poll_until_balance(&format!("{} wallet", self.name), INITIAL_FUNDING, polling, || {
            client.wallet_balance()
        })
        .await?;
        tracing::info!(node = %self.name, sats = INITIAL_FUNDING, "lnd wallet funded");

        let mut p2p = self
            .p2p_watcher
            .take()
            .unwrap_or_else(|| LogWatcher::from_start(&self.log_file()));
        self.wait_for(&mut p2p, P2P_MARKER).await?;

        Ok(config)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conf_points_at_bitcoind() {
        let bitcoin = BitcoinNodeConfig::new("127.0.0.1", 18443, "__cookie__", "s3cret")
            .with_zmq_ports(28332, 28333);
        let ports = LndPorts {
            p2p: 9735,
            grpc: 10009,
            rest: 8080,
        };

        let conf = conf_file_contents(ports, &bitcoin);
        assert!(conf.contains("listen=127.0.0.1:9735"));
        assert!(conf.contains("restlisten=127.0.0.1:8080"));
        assert!(conf.contains("bitcoind.rpchost=127.0.0.1:18443"));
        assert!(conf.contains("bitcoind.rpcpass=s3cret"));
        assert!(conf.contains("bitcoind.zmqpubrawtx=tcp://127.0.0.1:28333"));
        assert!(conf.contains("bitcoin.defaultchanconfs=1"));
    }
}
