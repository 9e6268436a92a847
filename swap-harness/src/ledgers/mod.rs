//! Ledger node instances and their lock-coordinated lifecycle.
//!
//! # Startup protocol
//!
//! Ledger nodes are expensive to start and are shared by every test worker on
//! the machine. [`LedgerLifecycleManager`] makes sure only one of them is ever
//! started per lock directory: the first worker to take the lock starts the
//! node and persists its connection parameters, everyone else reads them back.
//!
//! ```text
//! locks/
//! ├── bitcoind/{.lock, config.json, pid}
//! ├── geth/{.lock, config.json, pid}
//! ├── lnd-alice/{.lock, config.json, pid}
//! └── lnd-bob/{.lock, config.json, pid}
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

pub mod bitcoind;
pub mod config;
pub mod geth;
pub mod lifecycle;
pub mod lnd;

pub use bitcoind::BitcoindInstance;
pub use config::{
    BitcoinNetwork, BitcoinNodeConfig, EthereumNodeConfig, LedgerConfigs, LightningNodeConfig,
};
pub use geth::GethInstance;
pub use lifecycle::{LedgerHandle, LedgerLifecycleManager};
pub use lnd::LndInstance;

/// A single external ledger node process.
///
/// Lifecycle: constructed, then [`start`](LedgerInstance::start) blocks until
/// the node reports readiness, then [`warm_up`](LedgerInstance::warm_up)
/// performs mandatory initialization and yields the connection parameters.
/// [`stop`](LedgerInstance::stop) is idempotent and never fails.
#[async_trait]
pub trait LedgerInstance: Send {
    /// Connection parameters produced once the node is usable.
    type Config: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Short name used in logs, e.g. "bitcoind".
    fn name(&self) -> &str;

    /// Spawn the node and wait for its readiness marker.
    async fn start(&mut self) -> Result<()>;

    /// Post-start initialization (spendable funds, contracts, wallets).
    async fn warm_up(&mut self) -> Result<Self::Config>;

    /// OS pid of the node, if running.
    fn pid(&self) -> Option<u32>;

    /// Stop the node.
    async fn stop(&mut self);
}
