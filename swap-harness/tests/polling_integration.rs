//! Integration tests for the action polling engine.
//!
//! A wiremock server stands in for the daemon. Actions disappear once they
//! are executed and optionally append an event to the swap's log.

mod common;

use common::{fast_polling, herc20_hbit, FakeSwap};
use std::sync::Arc;
use swap_harness::daemon::{CndClient, Protocol, SwapEventKind};
use swap_harness::polling::{ActionKind, ActionPollingEngine};
use swap_harness::swap::Swap;
use swap_harness::wallets::Wallets;
use swap_harness::HarnessError;
use wiremock::MockServer;

fn swap_on(server: &MockServer, fake: &FakeSwap) -> Swap {
    let client = CndClient::new(server.uri()).unwrap();
    Swap::new(client, fake.href.clone(), Wallets::new())
}

// ============================================================================
// Action discovery
// ============================================================================

#[tokio::test]
async fn test_init_is_executed_without_event() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "1", herc20_hbit("Alice", &["init"])).await;
    fake.on_action(&server, "init", None).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let outcome = engine
        .assert_and_execute_next_action(&swap_on(&server, &fake), ActionKind::Init)
        .await
        .unwrap();

    assert!(outcome.executed);
    assert_eq!(outcome.event, None);
    assert_eq!(outcome.ledger_ref, None);
    assert_eq!(fake.calls(), 1);
}

#[tokio::test]
async fn test_missing_action_times_out() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "2", herc20_hbit("Bob", &[])).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let err = engine
        .assert_and_execute_next_action(&swap_on(&server, &fake), ActionKind::Fund)
        .await
        .unwrap_err();

    match err {
        HarnessError::ActionNotFound { action, .. } => assert_eq!(action, "fund"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_other_action_on_offer_is_not_executed() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "3", herc20_hbit("Alice", &["refund"])).await;
    fake.on_action(&server, "refund", None).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let result = engine
        .assert_and_execute_next_action(&swap_on(&server, &fake), ActionKind::Redeem)
        .await;

    assert!(matches!(result, Err(HarnessError::ActionNotFound { .. })));
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn test_more_than_one_action_is_rejected() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "4", herc20_hbit("Alice", &["redeem", "refund"])).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let result = engine
        .assert_and_execute_next_action(&swap_on(&server, &fake), ActionKind::Redeem)
        .await;

    assert!(matches!(result, Err(HarnessError::InvalidData { .. })));
}

// ============================================================================
// Event acknowledgement
// ============================================================================

#[tokio::test]
async fn test_redeem_waits_for_counterparty_ledger_event() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "5", herc20_hbit("Alice", &["redeem"])).await;
    fake.on_action(&server, "redeem", Some("hbit_redeemed")).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let outcome = engine
        .assert_and_execute_next_action(&swap_on(&server, &fake), ActionKind::Redeem)
        .await
        .unwrap();

    assert_eq!(outcome.event, Some(SwapEventKind::Redeemed(Protocol::Hbit)));
}

#[tokio::test]
async fn test_unacknowledged_event_times_out() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "6", herc20_hbit("Bob", &["fund"])).await;
    // the daemon never sees the transaction
    fake.on_action(&server, "fund", None).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let err = engine
        .assert_and_execute_next_action(&swap_on(&server, &fake), ActionKind::Fund)
        .await
        .unwrap_err();

    match err {
        HarnessError::EventNotObserved { event, .. } => assert_eq!(event, "hbit_funded"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fake.calls(), 1);
}

#[tokio::test]
async fn test_deploy_without_herc20_side_has_no_mapping() {
    let server = MockServer::start().await;
    // Bob funds hbit in a herc20 → hbit swap
    let fake = FakeSwap::mount(&server, "7", herc20_hbit("Bob", &["deploy"])).await;
    fake.on_action(&server, "deploy", None).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let result = engine
        .assert_and_execute_next_action(&swap_on(&server, &fake), ActionKind::Deploy)
        .await;

    assert!(matches!(result, Err(HarnessError::NoEventMapping { .. })));
    // the lookup fails before anything touches a ledger
    assert_eq!(fake.calls(), 0);
}

// ============================================================================
// Exactly-once execution
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_execute_once() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "8", herc20_hbit("Alice", &["deploy"])).await;
    fake.on_action(&server, "deploy", Some("herc20_deployed")).await;

    let engine = Arc::new(ActionPollingEngine::new(fast_polling()));
    let swap = swap_on(&server, &fake);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let swap = swap.clone();
            tokio::spawn(async move {
                engine
                    .assert_and_execute_next_action(&swap, ActionKind::Deploy)
                    .await
            })
        })
        .collect();

    let mut executed = 0;
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.event, Some(SwapEventKind::Herc20Deployed));
        if outcome.executed {
            executed += 1;
        }
    }

    assert_eq!(executed, 1);
    assert_eq!(fake.calls(), 1);
}

#[tokio::test]
async fn test_repeated_call_only_awaits_event() {
    let server = MockServer::start().await;
    let fake = FakeSwap::mount(&server, "9", herc20_hbit("Alice", &["fund"])).await;
    fake.on_action(&server, "fund", Some("herc20_funded")).await;

    let engine = ActionPollingEngine::new(fast_polling());
    let swap = swap_on(&server, &fake);

    let first = engine
        .assert_and_execute_next_action(&swap, ActionKind::Fund)
        .await
        .unwrap();
    let second = engine
        .assert_and_execute_next_action(&swap, ActionKind::Fund)
        .await
        .unwrap();

    assert!(first.executed);
    assert!(!second.executed);
    assert_eq!(second.event, Some(SwapEventKind::Funded(Protocol::Herc20)));
    assert_eq!(fake.calls(), 1);
}
