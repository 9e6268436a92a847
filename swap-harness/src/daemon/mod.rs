//! The swap daemon under test: its configuration, process and HTTP API.

pub mod client;
pub mod config;
pub mod instance;
pub mod payload;
pub mod siren;

pub use client::{CndClient, PeerInfo, Root};
pub use config::{CndConfigFile, CndConfigOverrides};
pub use instance::{CndInstance, CND_BIN_ENV};
pub use payload::{
    EscrowStatus, LedgerAction, Protocol, Role, SwapEntity, SwapEventKind, SwapProperties,
    SwapStatus,
};
pub use siren::{Action, Entity, Field, FieldValues};
