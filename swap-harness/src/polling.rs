//! Discovery and execution of swap actions.
//!
//! [`ActionPollingEngine::assert_and_execute_next_action`] waits for the
//! daemon to offer an action, executes it, and then waits for the daemon to
//! report the ledger event that action causes. Which event follows which
//! action is looked up in [`ExpectedEvents`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::daemon::{Protocol, Role, SwapEventKind};
use crate::swap::Swap;
use crate::{HarnessError, Result};

// ============================================================================
// Actions
// ============================================================================

/// Name of a swap action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Prepare the swap (halbit: add the hold invoice).
    Init,
    /// Accept a swap request.
    Accept,
    /// Deploy the escrow contract.
    Deploy,
    /// Fund the escrow.
    Fund,
    /// Redeem from the counterparty's escrow.
    Redeem,
    /// Refund our escrow after expiry.
    Refund,
}

impl ActionKind {
    /// Every action kind.
    pub const ALL: [ActionKind; 6] = [
        Self::Init,
        Self::Accept,
        Self::Deploy,
        Self::Fund,
        Self::Redeem,
        Self::Refund,
    ];

    /// Action name as exposed by the daemon.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Accept => "accept",
            Self::Deploy => "deploy",
            Self::Fund => "fund",
            Self::Redeem => "redeem",
            Self::Refund => "refund",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HarnessError::invalid_data("action", format!("unknown action {}", s)))
    }
}

// ============================================================================
// Expected events
// ============================================================================

type EventKey = (Role, ActionKind, Protocol, Protocol);

/// Which ledger event the daemon reports after an action.
///
/// Keyed by (role, action, alpha protocol, beta protocol). A value of `None`
/// means the action has no ledger-observable effect; a missing key means the
/// action is not valid for that combination at all.
#[derive(Clone, Debug)]
pub struct ExpectedEvents {
    table: HashMap<EventKey, Option<SwapEventKind>>,
}

impl ExpectedEvents {
    /// Build the table for every role and protocol pair.
    pub fn new() -> Self {
        let mut table = HashMap::new();

        for role in Role::ALL {
            for alpha in Protocol::ALL {
                for beta in Protocol::ALL {
                    // alice funds and refunds alpha and redeems beta, bob the reverse
                    let (own, counterparty) = match role {
                        Role::Alice => (alpha, beta),
                        Role::Bob => (beta, alpha),
                    };

                    table.insert((role, ActionKind::Init, alpha, beta), None);
                    table.insert((role, ActionKind::Accept, alpha, beta), None);
                    if own == Protocol::Herc20 {
                        table.insert(
                            (role, ActionKind::Deploy, alpha, beta),
                            Some(SwapEventKind::Herc20Deployed),
                        );
                    }
                    table.insert(
                        (role, ActionKind::Fund, alpha, beta),
                        Some(SwapEventKind::Funded(own)),
                    );
                    table.insert(
                        (role, ActionKind::Redeem, alpha, beta),
                        Some(SwapEventKind::Redeemed(counterparty)),
                    );
                    table.insert(
                        (role, ActionKind::Refund, alpha, beta),
                        Some(SwapEventKind::Refunded(own)),
                    );
                }
            }
        }

        Self { table }
    }

    /// Event expected after `role` executed `action` on an `alpha`/`beta` swap.
    pub fn lookup(
        &self,
        role: Role,
        action: ActionKind,
        alpha: Protocol,
        beta: Protocol,
    ) -> Result<Option<SwapEventKind>> {
        self.table
            .get(&(role, action, alpha, beta))
            .copied()
            .ok_or_else(|| HarnessError::NoEventMapping {
                role: role.to_string(),
                action: action.to_string(),
                alpha: alpha.to_string(),
                beta: beta.to_string(),
            })
    }

    /// Number of defined combinations.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for ExpectedEvents {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Polling configuration
// ============================================================================

/// Timeouts and intervals of the two polling phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollingConfig {
    /// How long to wait for an action to be offered.
    pub action_timeout: Duration,
    /// Pause between action polls.
    pub action_interval: Duration,
    /// How long to wait for the daemon to report the expected event.
    pub event_timeout: Duration,
    /// Pause between event polls.
    pub event_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(20),
            action_interval: Duration::from_secs(1),
            event_timeout: Duration::from_secs(30),
            event_interval: Duration::from_millis(500),
        }
    }
}

impl PollingConfig {
    /// Set the action discovery bounds.
    pub fn with_action_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.action_timeout = timeout;
        self.action_interval = interval;
        self
    }

    /// Set the event acknowledgement bounds.
    pub fn with_event_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.event_timeout = timeout;
        self.event_interval = interval;
        self
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Outcome of one [`ActionPollingEngine::assert_and_execute_next_action`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Transaction id or payment reference of the ledger action, if any.
    pub ledger_ref: Option<String>,
    /// Event that was awaited, if any.
    pub event: Option<SwapEventKind>,
    /// False when another caller had already executed the action.
    pub executed: bool,
}

type Executed = Arc<tokio::sync::Mutex<HashSet<ActionKind>>>;

/// Drives swaps by polling for actions and their events.
#[derive(Debug, Default)]
pub struct ActionPollingEngine {
    config: PollingConfig,
    events: ExpectedEvents,
    swaps: Mutex<HashMap<String, Executed>>,
}

impl ActionPollingEngine {
    /// Engine with `config` bounds.
    pub fn new(config: PollingConfig) -> Self {
        Self {
            config,
            events: ExpectedEvents::new(),
            swaps: Mutex::new(HashMap::new()),
        }
    }

    /// Polling bounds in use.
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Event lookup table in use.
    pub fn expected_events(&self) -> &ExpectedEvents {
        &self.events
    }

    /// Wait for `kind` to be offered on `swap`, execute it and wait for the
    /// daemon to acknowledge its ledger event.
    ///
    /// Executions are serialized per swap. An action already executed through
    /// this engine is not executed again; the call only waits for its event.
    pub async fn assert_and_execute_next_action(
        &self,
        swap: &Swap,
        kind: ActionKind,
    ) -> Result<ActionOutcome> {
        // an action without a known event must fail before it touches a ledger
        let details = swap.fetch_details().await?;
        let properties = details.properties.ok_or_else(|| {
            HarnessError::invalid_data("swap", "swap resource has no properties")
        })?;
        let event = self.events.lookup(
            properties.role,
            kind,
            properties.alpha.protocol,
            properties.beta.protocol,
        )?;

        let executed = self.executed_for(swap);
        let mut executed = executed.lock().await;

        let (ledger_ref, was_executed) = if executed.contains(&kind) {
            tracing::debug!(action = %kind, swap = %swap.self_href(), "action already executed");
            (None, false)
        } else {
            let action = self.wait_for_action(swap, kind).await?;
            let ledger_ref = swap.execute(&action).await?;
            executed.insert(kind);
            tracing::info!(
                action = %kind,
                swap = %swap.self_href(),
                ledger_ref = ledger_ref.as_deref().unwrap_or("-"),
                "action executed"
            );
            (ledger_ref, true)
        };

        if let Some(event) = event {
            self.wait_for_event(swap, event).await?;
        }

        Ok(ActionOutcome {
            ledger_ref,
            event,
            executed: was_executed,
        })
    }

    fn executed_for(&self, swap: &Swap) -> Executed {
        let mut swaps = self.swaps.lock().unwrap_or_else(|e| e.into_inner());
        swaps.entry(swap.resource_url()).or_default().clone()
    }

    async fn wait_for_action(
        &self,
        swap: &Swap,
        kind: ActionKind,
    ) -> Result<crate::daemon::Action> {
        let deadline = Instant::now() + self.config.action_timeout;

        loop {
            match swap.next_action().await? {
                Some(action) if action.name == kind.as_str() => return Ok(action),
                other => tracing::debug!(
                    expected = %kind,
                    offered = other.as_ref().map(|a| a.name.as_str()).unwrap_or("none"),
                    "waiting for action"
                ),
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::ActionNotFound {
                    action: kind.to_string(),
                    timeout: self.config.action_timeout,
                });
            }
            tokio::time::sleep(self.config.action_interval).await;
        }
    }

    async fn wait_for_event(&self, swap: &Swap, event: SwapEventKind) -> Result<()> {
        let deadline = Instant::now() + self.config.event_timeout;

        loop {
            let details = swap.fetch_details().await?;
            if details
                .properties
                .as_ref()
                .is_some_and(|p| p.has_event(event))
            {
                tracing::info!(event = %event, swap = %swap.self_href(), "event observed");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::EventNotObserved {
                    event: event.to_string(),
                    timeout: self.config.event_timeout,
                });
            }
            tokio::time::sleep(self.config.event_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_round_trips_names() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("decline".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_fund_and_refund_use_own_ledger() {
        let events = ExpectedEvents::new();
        let (alpha, beta) = (Protocol::Herc20, Protocol::Hbit);

        assert_eq!(
            events.lookup(Role::Alice, ActionKind::Fund, alpha, beta).unwrap(),
            Some(SwapEventKind::Funded(Protocol::Herc20))
        );
        assert_eq!(
            events.lookup(Role::Bob, ActionKind::Fund, alpha, beta).unwrap(),
            Some(SwapEventKind::Funded(Protocol::Hbit))
        );
        assert_eq!(
            events.lookup(Role::Alice, ActionKind::Refund, alpha, beta).unwrap(),
            Some(SwapEventKind::Refunded(Protocol::Herc20))
        );
        assert_eq!(
            events.lookup(Role::Bob, ActionKind::Refund, alpha, beta).unwrap(),
            Some(SwapEventKind::Refunded(Protocol::Hbit))
        );
    }

    #[test]
    fn test_redeem_uses_counterparty_ledger() {
        let events = ExpectedEvents::new();
        let (alpha, beta) = (Protocol::Halbit, Protocol::Herc20);

        assert_eq!(
            events.lookup(Role::Alice, ActionKind::Redeem, alpha, beta).unwrap(),
            Some(SwapEventKind::Redeemed(Protocol::Herc20))
        );
        assert_eq!(
            events.lookup(Role::Bob, ActionKind::Redeem, alpha, beta).unwrap(),
            Some(SwapEventKind::Redeemed(Protocol::Halbit))
        );
    }

    #[test]
    fn test_init_and_accept_expect_nothing() {
        let events = ExpectedEvents::new();
        for role in Role::ALL {
            for action in [ActionKind::Init, ActionKind::Accept] {
                assert_eq!(
                    events
                        .lookup(role, action, Protocol::Hbit, Protocol::Herc20)
                        .unwrap(),
                    None
                );
            }
        }
    }

    #[test]
    fn test_deploy_only_for_herc20_funder() {
        let events = ExpectedEvents::new();

        assert_eq!(
            events
                .lookup(Role::Alice, ActionKind::Deploy, Protocol::Herc20, Protocol::Hbit)
                .unwrap(),
            Some(SwapEventKind::Herc20Deployed)
        );
        assert_eq!(
            events
                .lookup(Role::Bob, ActionKind::Deploy, Protocol::Hbit, Protocol::Herc20)
                .unwrap(),
            Some(SwapEventKind::Herc20Deployed)
        );

        let err = events
            .lookup(Role::Bob, ActionKind::Deploy, Protocol::Herc20, Protocol::Hbit)
            .unwrap_err();
        assert!(matches!(err, HarnessError::NoEventMapping { .. }));
    }

    #[test]
    fn test_table_covers_every_combination() {
        let events = ExpectedEvents::new();
        // 2 roles x 9 protocol pairs x 5 unconditional actions, plus deploy
        // for the 3 pairs where the acting side funds with herc20
        assert_eq!(events.len(), 2 * 9 * 5 + 2 * 3);
    }

    #[test]
    fn test_default_polling_bounds() {
        let config = PollingConfig::default();
        assert_eq!(config.action_timeout, Duration::from_secs(20));
        assert_eq!(config.action_interval, Duration::from_secs(1));
        assert_eq!(config.event_timeout, Duration::from_secs(30));
        assert_eq!(config.event_interval, Duration::from_millis(500));
    }
}
