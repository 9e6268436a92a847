//! Connection parameters produced by ledger instances.
//!
//! Each record is produced once per run (or read back from the persisted
//! `config.json`) and is never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bitcoin network selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    /// Bitcoin mainnet.
    Mainnet,
    /// Bitcoin testnet (testnet3).
    Testnet,
    /// Bitcoin regtest (local development).
    #[default]
    Regtest,
}

impl BitcoinNetwork {
    /// Get the network name as used in configs and daemon payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    /// Chain name reported by `getblockchaininfo`.
    pub fn chain_name(&self) -> &'static str {
        match self {
            Self::Mainnet => "main",
            Self::Testnet => "test",
            Self::Regtest => "regtest",
        }
    }

    /// Parse either the config name or the `getblockchaininfo` chain name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "mainnet" | "main" | "bitcoin" => Some(Self::Mainnet),
            "testnet" | "test" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }
}

/// Connection parameters for a bitcoind node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BitcoinNodeConfig {
    /// Network the node runs on.
    #[serde(default)]
    pub network: BitcoinNetwork,

    /// Host the RPC and P2P interfaces listen on.
    pub host: String,

    /// JSON-RPC port.
    pub rpc_port: u16,

    /// P2P port.
    #[serde(default)]
    pub p2p_port: u16,

    /// ZMQ raw block publisher port.
    #[serde(default)]
    pub zmq_block_port: u16,

    /// ZMQ raw transaction publisher port.
    #[serde(default)]
    pub zmq_tx_port: u16,

    /// RPC user (from the cookie file).
    pub username: String,

    /// RPC password (from the cookie file).
    pub password: String,

    /// Node data directory.
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Name of the wallet holding the mined coins.
    #[serde(default = "default_miner_wallet")]
    pub miner_wallet: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_miner_wallet() -> String {
    "miner".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl BitcoinNodeConfig {
    /// Create a regtest configuration for a node at `host:rpc_port`.
    pub fn new(
        host: impl Into<String>,
        rpc_port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            network: BitcoinNetwork::Regtest,
            host: host.into(),
            rpc_port,
            p2p_port: 0,
            zmq_block_port: 0,
            zmq_tx_port: 0,
            username: username.into(),
            password: password.into(),
            data_dir: PathBuf::new(),
            miner_wallet: default_miner_wallet(),
            timeout_secs: default_timeout(),
        }
    }

    /// Set the P2P port.
    pub fn with_p2p_port(mut self, port: u16) -> Self {
        self.p2p_port = port;
        self
    }

    /// Set the ZMQ publisher ports.
    pub fn with_zmq_ports(mut self, block_port: u16, tx_port: u16) -> Self {
        self.zmq_block_port = block_port;
        self.zmq_tx_port = tx_port;
        self
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the miner wallet name.
    pub fn with_miner_wallet(mut self, name: impl Into<String>) -> Self {
        self.miner_wallet = name.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// JSON-RPC endpoint.
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}", self.host, self.rpc_port)
    }

    /// `host:port` of the RPC interface.
    pub fn rpc_socket(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }

    /// ZMQ block publisher endpoint.
    pub fn zmq_block_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.zmq_block_port)
    }

    /// ZMQ transaction publisher endpoint.
    pub fn zmq_tx_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.zmq_tx_port)
    }
}

/// Connection parameters for a geth dev node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EthereumNodeConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: String,

    /// Chain id reported by the node.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Pre-funded, node-unlocked dev account.
    pub dev_account: String,

    /// ERC20 token contract deployed during warm-up.
    #[serde(default)]
    pub token_contract: Option<String>,

    /// Node data directory.
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Chain id of geth's dev mode.
pub const DEV_CHAIN_ID: u64 = 1337;

fn default_chain_id() -> u64 {
    DEV_CHAIN_ID
}

impl EthereumNodeConfig {
    /// Create a configuration for the node at `rpc_url`.
    pub fn new(rpc_url: impl Into<String>, dev_account: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id: DEV_CHAIN_ID,
            dev_account: dev_account.into(),
            token_contract: None,
            data_dir: PathBuf::new(),
            timeout_secs: default_timeout(),
        }
    }

    /// Set the chain id.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Set the token contract.
    pub fn with_token_contract(mut self, contract: impl Into<String>) -> Self {
        self.token_contract = Some(contract.into());
        self
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Connection parameters for an lnd node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightningNodeConfig {
    /// REST API endpoint (e.g. "https://localhost:8080").
    pub rest_url: String,

    /// `host:port` other nodes connect to.
    #[serde(default)]
    pub p2p_socket: String,

    /// `host:port` of the gRPC interface.
    #[serde(default)]
    pub grpc_socket: String,

    /// TLS certificate written by lnd (PEM).
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,

    /// Admin macaroon written by lnd.
    #[serde(default)]
    pub macaroon_path: Option<PathBuf>,

    /// Node data directory (`--lnddir`).
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Network of the backing chain.
    #[serde(default)]
    pub network: BitcoinNetwork,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl LightningNodeConfig {
    /// Create a configuration for the REST API at `rest_url`.
    pub fn new(rest_url: impl Into<String>) -> Self {
        Self {
            rest_url: rest_url.into(),
            p2p_socket: String::new(),
            grpc_socket: String::new(),
            tls_cert_path: None,
            macaroon_path: None,
            data_dir: PathBuf::new(),
            network: BitcoinNetwork::Regtest,
            timeout_secs: default_timeout(),
        }
    }

    /// Set the P2P socket.
    pub fn with_p2p_socket(mut self, socket: impl Into<String>) -> Self {
        self.p2p_socket = socket.into();
        self
    }

    /// Set the gRPC socket.
    pub fn with_grpc_socket(mut self, socket: impl Into<String>) -> Self {
        self.grpc_socket = socket.into();
        self
    }

    /// Set the TLS certificate path.
    pub fn with_tls_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_cert_path = Some(path.into());
        self
    }

    /// Set the macaroon path.
    pub fn with_macaroon(mut self, path: impl Into<PathBuf>) -> Self {
        self.macaroon_path = Some(path.into());
        self
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Snapshot of every ledger an environment started.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfigs {
    /// bitcoind, if started.
    pub bitcoin: Option<BitcoinNodeConfig>,
    /// geth, if started.
    pub ethereum: Option<EthereumNodeConfig>,
    /// Alice's lnd, if started.
    pub lnd_alice: Option<LightningNodeConfig>,
    /// Bob's lnd, if started.
    pub lnd_bob: Option<LightningNodeConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_bitcoin_config_fills_defaults() {
        let json = r#"{
            "host": "127.0.0.1",
            "rpc_port": 18443,
            "username": "__cookie__",
            "password": "secret"
        }"#;
        let config: BitcoinNodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.network, BitcoinNetwork::Regtest);
        assert_eq!(config.miner_wallet, "miner");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.rpc_url(), "http://127.0.0.1:18443");
    }

    #[test]
    fn test_network_names() {
        assert_eq!(BitcoinNetwork::parse("regtest"), Some(BitcoinNetwork::Regtest));
        assert_eq!(BitcoinNetwork::parse("main"), Some(BitcoinNetwork::Mainnet));
        assert_eq!(BitcoinNetwork::Testnet.chain_name(), "test");
        assert_eq!(BitcoinNetwork::parse("signet"), None);
    }

    #[test]
    fn test_ethereum_builder() {
        let config = EthereumNodeConfig::new("http://127.0.0.1:8545", "0xdev")
            .with_token_contract("0xtoken")
            .with_timeout(5);
        assert_eq!(config.chain_id, DEV_CHAIN_ID);
        assert_eq!(config.token_contract.as_deref(), Some("0xtoken"));
        assert_eq!(config.timeout_secs, 5);
    }
}
