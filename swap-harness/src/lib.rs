//! Swap harness library.
//!
//! Orchestrates end-to-end tests of the atomic swap daemon: it starts local
//! ledger nodes once per machine, gives every test participant its own daemon
//! and wallets, and drives swaps step by step through the daemon's HTTP API.
//!
//! # Features
//!
//! - **Shared ledgers**: bitcoind, geth and lnd are started under file locks
//!   and reused by every concurrent test worker
//! - **Actors**: named participants with a daemon, wallets and balance
//!   bookkeeping
//! - **Action polling**: protocol steps wait for the daemon to offer an action,
//!   execute it exactly once and wait for the resulting ledger event
//!
//! # Example
//!
//! ```ignore
//! use swap_harness::prelude::*;
//!
//! let mut env = Environment::start(HarnessConfig::from_env()?).await?;
//! let alice = env.new_actor(ActorName::Alice, &Default::default()).await?;
//! let bob = env.new_actor(ActorName::Bob, &Default::default()).await?;
//! alice.connect(&bob).await?;
//!
//! let bodies = env.swap_factory()?.new_swap(&alice, &bob).await?;
//! alice.create_herc20_hbit_swap(bodies.herc20_hbit.alice).await?;
//! bob.create_herc20_hbit_swap(bodies.herc20_hbit.bob).await?;
//!
//! alice.init().await?;
//! alice.deploy().await?;
//! alice.fund().await?;
//! bob.fund().await?;
//! alice.redeem().await?;
//! bob.redeem().await?;
//!
//! alice.assert_swapped().await?;
//! bob.assert_swapped().await?;
//! env.teardown().await;
//! ```

pub mod actor;
pub mod asset;
pub mod balance;
pub mod config;
pub mod daemon;
pub mod environment;
pub mod errors;
pub mod ledgers;
pub mod lock;
pub mod polling;
pub mod prelude;
pub mod process;
pub mod rpc;
pub mod swap;
pub mod wallets;

pub use errors::{ErrorKind, HarnessError, HarnessErrorCode, Result};
