//! Integration tests for actors against mocked daemons.
//!
//! Actors are created without spawning a daemon; their HTTP API socket points
//! at a wiremock server instead.

mod common;

use common::{fast_polling, herc20_hbit, mount_root, swap_json, FakeSwap};
use serde_json::json;
use std::sync::Arc;
use swap_harness::actor::{Actor, ActorName, ActorRegistry, Side};
use swap_harness::daemon::payload::{HbitParams, Herc20HbitBody, Herc20Params, Peer};
use swap_harness::daemon::{CndConfigFile, CndConfigOverrides, CndInstance, EscrowStatus, Role};
use swap_harness::polling::ActionPollingEngine;
use swap_harness::wallets::Wallets;
use swap_harness::HarnessError;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn actor(name: ActorName, server: &MockServer, dir: &TempDir) -> Actor {
    let config = CndConfigFile::new(dir.path().join(name.as_str()), 0, 0).merge(
        &CndConfigOverrides {
            http_socket: Some(server.address().to_string()),
            ..Default::default()
        },
    );
    let cnd = CndInstance::with_binary("/nonexistent/cnd", name.as_str(), dir.path(), config);
    let engine = Arc::new(ActionPollingEngine::new(fast_polling()));
    Actor::unstarted(name, cnd, Wallets::new(), engine).unwrap()
}

fn herc20_hbit_body(herc20_amount: u128, hbit_amount: u128) -> Herc20HbitBody {
    Herc20HbitBody {
        alpha: Herc20Params {
            amount: herc20_amount,
            token_contract: "0x0000000000000000000000000000000000000001".to_string(),
            identity: "0x00000000000000000000000000000000000000aa".to_string(),
            chain_id: 1337,
            absolute_expiry: 1_600_000_240,
        },
        beta: HbitParams {
            amount: hbit_amount,
            final_identity: "bcrt1qalice".to_string(),
            network: "regtest".to_string(),
            absolute_expiry: 1_600_000_120,
        },
        role: Role::Alice,
        peer: Peer {
            peer_id: "QmBob".to_string(),
            address_hint: "/ip4/127.0.0.1/tcp/9940".to_string(),
        },
    }
}

// ============================================================================
// Peers
// ============================================================================

#[tokio::test]
async fn test_connect_dials_and_waits_for_peer() {
    let dir = TempDir::new().unwrap();
    let alice_api = MockServer::start().await;
    let bob_api = MockServer::start().await;

    mount_root(&bob_api, "QmBob", "/ip4/127.0.0.1/tcp/9940").await;
    Mock::given(method("POST"))
        .and(path("/dial"))
        .and(body_partial_json(json!({ "addresses": ["/ip4/127.0.0.1/tcp/9940"] })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&alice_api)
        .await;
    Mock::given(method("GET"))
        .and(path("/peers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "peers": [{ "id": "QmBob", "endpoints": ["/ip4/127.0.0.1/tcp/9940"] }]
        })))
        .mount(&alice_api)
        .await;

    let registry = ActorRegistry::new();
    let alice = registry
        .register(actor(ActorName::Alice, &alice_api, &dir).with_registry(Arc::downgrade(&registry)))
        .unwrap();
    let bob = registry
        .register(actor(ActorName::Bob, &bob_api, &dir))
        .unwrap();

    alice.connect_to(ActorName::Bob).await.unwrap();

    let peer = bob.as_peer().await.unwrap();
    assert_eq!(peer.peer_id, "QmBob");
    assert_eq!(peer.address_hint, "/ip4/127.0.0.1/tcp/9940");
}

#[tokio::test]
async fn test_registry_rejects_duplicates() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;

    let registry = ActorRegistry::new();
    registry.register(actor(ActorName::Alice, &api, &dir)).unwrap();
    let err = registry
        .register(actor(ActorName::Alice, &api, &dir))
        .unwrap_err();

    assert!(matches!(err, HarnessError::InvalidData { .. }));
    assert_eq!(registry.names(), vec![ActorName::Alice]);
}

#[tokio::test]
async fn test_counterparty_needs_registry() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let alice = actor(ActorName::Alice, &api, &dir);

    assert!(alice.counterparty(ActorName::Bob).is_err());
}

// ============================================================================
// Swap creation
// ============================================================================

#[tokio::test]
async fn test_zero_quantity_fails_before_post() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/swaps/herc20/hbit"))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/swaps/1"))
        .expect(0)
        .mount(&api)
        .await;

    let alice = actor(ActorName::Alice, &api, &dir);
    let err = alice
        .create_herc20_hbit_swap(herc20_hbit_body(0, 1_000_000))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::InvalidData { .. }));
    assert!(alice.swap().await.is_none());
}

#[tokio::test]
async fn test_balances_are_prepared_before_post() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/swaps/herc20/hbit"))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/swaps/1"))
        .expect(0)
        .mount(&api)
        .await;

    // no wallets, so minting cannot happen and the swap must not be created
    let alice = actor(ActorName::Alice, &api, &dir);
    let err = alice
        .create_herc20_hbit_swap(herc20_hbit_body(9_000, 1_000_000))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::MissingWallet(_)));
}

// ============================================================================
// Protocol steps
// ============================================================================

#[tokio::test]
async fn test_steps_without_swap_fail_fast() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let alice = actor(ActorName::Alice, &api, &dir);

    for result in [
        alice.init().await,
        alice.fund().await,
        alice.redeem().await,
        alice.refund().await,
    ] {
        assert!(matches!(result, Err(HarnessError::NoActiveSwap { .. })));
    }
}

#[tokio::test]
async fn test_steps_drive_swap_found_by_waiting() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let fake = FakeSwap::mount(&api, "abc", herc20_hbit("Alice", &["init"])).await;
    fake.on_action(&api, "init", None).await;
    fake.on_action(&api, "fund", Some("herc20_funded")).await;
    Mock::given(method("GET"))
        .and(path("/swaps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "class": ["swaps"],
            "entities": [{ "class": ["swap"], "rel": ["item"], "href": "/swaps/abc" }]
        })))
        .mount(&api)
        .await;

    let alice = actor(ActorName::Alice, &api, &dir);
    assert_eq!(alice.wait_for_swap().await.unwrap(), "/swaps/abc");

    let init = alice.init().await.unwrap();
    assert!(init.executed);

    fake.state.lock().unwrap().actions.push("fund".to_string());
    let fund = alice.fund().await.unwrap();
    assert!(fund.executed);
    assert_eq!(fake.calls(), 2);
}

#[tokio::test]
async fn test_assert_ledger_state() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;

    let mut body = swap_json("/swaps/xyz", &herc20_hbit("Alice", &[]));
    body["properties"]["alpha"]["status"] = json!("FUNDED");
    Mock::given(method("GET"))
        .and(path("/swaps/xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/swaps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [{ "rel": ["item"], "href": "/swaps/xyz" }]
        })))
        .mount(&api)
        .await;

    let alice = actor(ActorName::Alice, &api, &dir);
    alice.wait_for_swap().await.unwrap();

    alice
        .assert_ledger_state(Side::Alpha, EscrowStatus::Funded)
        .await
        .unwrap();
    assert!(alice
        .assert_ledger_state(Side::Alpha, EscrowStatus::Redeemed)
        .await
        .is_err());
    assert!(alice
        .assert_ledger_state(Side::Beta, EscrowStatus::Funded)
        .await
        .is_err());
}

#[tokio::test]
async fn test_assert_swapped_times_out_while_in_progress() {
    let dir = TempDir::new().unwrap();
    let api = MockServer::start().await;
    let fake = FakeSwap::mount(&api, "slow", herc20_hbit("Bob", &[])).await;
    Mock::given(method("GET"))
        .and(path("/swaps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [{ "href": fake.href }]
        })))
        .mount(&api)
        .await;

    let bob = actor(ActorName::Bob, &api, &dir);
    bob.wait_for_swap().await.unwrap();

    let err = bob.assert_swapped().await.unwrap_err();
    assert!(matches!(err, HarnessError::Timeout { .. }));
}
