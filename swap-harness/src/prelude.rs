//! Everything a test script usually needs.

pub use crate::actor::{Actor, ActorName, ActorRegistry, Side, SwapFactory, SwapSettings};
pub use crate::asset::{Asset, LedgerKind};
pub use crate::config::HarnessConfig;
pub use crate::daemon::payload::Position;
pub use crate::daemon::{CndConfigOverrides, EscrowStatus, Role, SwapStatus};
pub use crate::environment::{Environment, LedgerSelection};
pub use crate::polling::{ActionKind, PollingConfig};
pub use crate::{HarnessError, Result};
