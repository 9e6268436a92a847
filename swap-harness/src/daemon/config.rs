//! The daemon's TOML configuration file.
//!
//! A [`CndConfigFile`] is built from the ledger configs of the environment,
//! adjusted by a typed [`CndConfigOverrides`] and written next to the
//! daemon's data directory before it is spawned with `--config`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ledgers::{BitcoinNetwork, BitcoinNodeConfig, EthereumNodeConfig, LightningNodeConfig};
use crate::Result;

/// Complete daemon configuration as written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CndConfigFile {
    /// libp2p listen addresses.
    pub network: NetworkSection,
    /// HTTP API settings.
    pub http_api: HttpApiSection,
    /// Persistent state.
    pub data: DataSection,
    /// Daemon log verbosity.
    #[serde(default)]
    pub logging: LoggingSection,
    /// Bitcoin connection, when the actor trades bitcoin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitcoin: Option<BitcoinSection>,
    /// Ethereum connection, when the actor trades ether or tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethereum: Option<EthereumSection>,
    /// Lightning connection, when the actor uses an lnd node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lightning: Option<LightningSection>,
}

/// `[network]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkSection {
    /// Multiaddresses, e.g. "/ip4/0.0.0.0/tcp/9939".
    pub listen: Vec<String>,
}

/// `[http_api]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpApiSection {
    /// `address:port` the API binds to.
    pub socket: String,
    /// CORS policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsSection>,
}

/// `[http_api.cors]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorsSection {
    /// "all", "none" or a list rendered by the daemon.
    pub allowed_origins: String,
}

/// `[data]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    /// Directory holding the daemon database and seed.
    pub dir: PathBuf,
}

/// `[logging]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Level filter, e.g. "Debug".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "Debug".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `[bitcoin]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BitcoinSection {
    /// Network the daemon expects.
    pub network: BitcoinNetwork,
    /// `[bitcoin.bitcoind]`
    pub bitcoind: NodeUrl,
}

/// `[ethereum]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EthereumSection {
    /// Chain id the daemon expects.
    pub chain_id: u64,
    /// `[ethereum.geth]`
    pub geth: NodeUrl,
    /// `[ethereum.tokens]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokensSection>,
}

/// `[ethereum.tokens]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokensSection {
    /// ERC20 contract traded as DAI.
    pub dai: String,
}

/// `[lightning]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightningSection {
    /// Network of the chain backing the node.
    pub network: BitcoinNetwork,
    /// `[lightning.lnd]`
    pub lnd: LndSection,
}

/// `[lightning.lnd]`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LndSection {
    /// REST endpoint (https).
    pub rest_api_url: String,
    /// lnd directory; the daemon derives cert and macaroon paths from it.
    pub dir: PathBuf,
}

/// A node endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeUrl {
    /// e.g. "http://127.0.0.1:18443".
    pub node_url: String,
}

impl CndConfigFile {
    /// Minimal configuration: HTTP API on `http_port`, libp2p on
    /// `p2p_port`, state in `data_dir`. No ledgers.
    pub fn new(data_dir: impl Into<PathBuf>, http_port: u16, p2p_port: u16) -> Self {
        Self {
            network: NetworkSection {
                listen: vec![format!("/ip4/0.0.0.0/tcp/{}", p2p_port)],
            },
            http_api: HttpApiSection {
                socket: format!("127.0.0.1:{}", http_port),
                cors: None,
            },
            data: DataSection {
                dir: data_dir.into(),
            },
            logging: LoggingSection::default(),
            bitcoin: None,
            ethereum: None,
            lightning: None,
        }
    }

    /// Connect the daemon to `bitcoin`.
    pub fn with_bitcoin(mut self, bitcoin: &BitcoinNodeConfig) -> Self {
        self.bitcoin = Some(BitcoinSection {
            network: bitcoin.network,
            bitcoind: NodeUrl {
                node_url: bitcoin.rpc_url(),
            },
        });
        self
    }

    /// Connect the daemon to `ethereum`, trading its token contract as DAI.
    pub fn with_ethereum(mut self, ethereum: &EthereumNodeConfig) -> Self {
        self.ethereum = Some(EthereumSection {
            chain_id: ethereum.chain_id,
            geth: NodeUrl {
                node_url: ethereum.rpc_url.clone(),
            },
            tokens: ethereum
                .token_contract
                .clone()
                .map(|dai| TokensSection { dai }),
        });
        self
    }

    /// Connect the daemon to the lnd node `lightning`.
    pub fn with_lightning(mut self, lightning: &LightningNodeConfig) -> Self {
        self.lightning = Some(LightningSection {
            network: lightning.network,
            lnd: LndSection {
                rest_api_url: lightning.rest_url.clone(),
                dir: lightning.data_dir.clone(),
            },
        });
        self
    }

    /// `http://<socket>` of the HTTP API.
    pub fn http_api_url(&self) -> String {
        format!("http://{}", self.http_api.socket)
    }

    /// Apply `overrides` field by field. Set fields win; unset fields keep
    /// the current value.
    pub fn merge(mut self, overrides: &CndConfigOverrides) -> Self {
        if let Some(listen) = &overrides.listen {
            self.network.listen = listen.clone();
        }
        if let Some(socket) = &overrides.http_socket {
            self.http_api.socket = socket.clone();
        }
        if let Some(origins) = &overrides.cors_allowed_origins {
            self.http_api.cors = Some(CorsSection {
                allowed_origins: origins.clone(),
            });
        }
        if let Some(dir) = &overrides.data_dir {
            self.data.dir = dir.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if let (Some(url), Some(bitcoin)) = (&overrides.bitcoin_node_url, &mut self.bitcoin) {
            bitcoin.bitcoind.node_url = url.clone();
        }
        if let Some(ethereum) = &mut self.ethereum {
            if let Some(url) = &overrides.ethereum_node_url {
                ethereum.geth.node_url = url.clone();
            }
            if let Some(chain_id) = overrides.ethereum_chain_id {
                ethereum.chain_id = chain_id;
            }
            if let Some(dai) = &overrides.token_contract {
                ethereum.tokens = Some(TokensSection { dai: dai.clone() });
            }
        }
        if let (Some(url), Some(lightning)) = (&overrides.lnd_rest_url, &mut self.lightning) {
            lightning.lnd.rest_api_url = url.clone();
        }
        self
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Parse a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Write the file to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

/// Test-specific adjustments to a daemon configuration.
///
/// Sections the base configuration lacks are not created by an override of
/// one of their fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CndConfigOverrides {
    /// Replaces `network.listen`.
    #[serde(default)]
    pub listen: Option<Vec<String>>,
    /// Replaces `http_api.socket`.
    #[serde(default)]
    pub http_socket: Option<String>,
    /// Sets `http_api.cors.allowed_origins`.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
    /// Replaces `data.dir`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Replaces `logging.level`.
    #[serde(default)]
    pub log_level: Option<String>,
    /// Replaces `bitcoin.bitcoind.node_url`.
    #[serde(default)]
    pub bitcoin_node_url: Option<String>,
    /// Replaces `ethereum.geth.node_url`.
    #[serde(default)]
    pub ethereum_node_url: Option<String>,
    /// Replaces `ethereum.chain_id`.
    #[serde(default)]
    pub ethereum_chain_id: Option<u64>,
    /// Replaces `ethereum.tokens.dai`.
    #[serde(default)]
    pub token_contract: Option<String>,
    /// Replaces `lightning.lnd.rest_api_url`.
    #[serde(default)]
    pub lnd_rest_url: Option<String>,
}

impl CndConfigOverrides {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the log level.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Override the ethereum chain id.
    pub fn with_ethereum_chain_id(mut self, chain_id: u64) -> Self {
        self.ethereum_chain_id = Some(chain_id);
        self
    }

    /// Override the traded token contract.
    pub fn with_token_contract(mut self, contract: impl Into<String>) -> Self {
        self.token_contract = Some(contract.into());
        self
    }

    /// Override the CORS policy.
    pub fn with_cors(mut self, allowed_origins: impl Into<String>) -> Self {
        self.cors_allowed_origins = Some(allowed_origins.into());
        self
    }
}
