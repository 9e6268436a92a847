//! End-to-end swaps against real nodes.
//!
//! These tests are marked `#[ignore]` and require bitcoind, geth, lnd and the
//! swap daemon on `PATH` (or the `*_BIN` overrides):
//!
//! ```bash
//! export SWAP_HARNESS_ROOT=/tmp/swap-harness
//! cargo test -p swap-harness --test e2e_swap -- --ignored --test-threads=1
//! ```

use swap_harness::prelude::*;

async fn environment(ledgers: &str) -> Environment {
    let config = HarnessConfig::from_env()
        .unwrap()
        .with_ledgers(LedgerSelection::parse(ledgers).unwrap());
    Environment::start(config).await.unwrap()
}

#[tokio::test]
#[ignore = "requires bitcoind, geth and cnd"]
async fn test_herc20_hbit_happy_path() {
    let mut env = environment("bitcoin,ethereum").await;
    let overrides = CndConfigOverrides::default();
    let alice = env.new_actor(ActorName::Alice, &overrides).await.unwrap();
    let bob = env.new_actor(ActorName::Bob, &overrides).await.unwrap();
    alice.connect(&bob).await.unwrap();

    let bodies = env
        .swap_factory()
        .unwrap()
        .new_swap(&alice, &bob)
        .await
        .unwrap();
    alice
        .create_herc20_hbit_swap(bodies.herc20_hbit.alice)
        .await
        .unwrap();
    bob.create_herc20_hbit_swap(bodies.herc20_hbit.bob)
        .await
        .unwrap();

    alice.init().await.unwrap();
    alice.deploy().await.unwrap();
    alice.fund().await.unwrap();
    bob.fund().await.unwrap();
    alice.redeem().await.unwrap();
    bob.redeem().await.unwrap();

    alice.assert_swapped().await.unwrap();
    bob.assert_swapped().await.unwrap();
    env.teardown().await;
}

#[tokio::test]
#[ignore = "requires bitcoind, geth and cnd"]
async fn test_hbit_herc20_refund_after_expiry() {
    let mut env = environment("bitcoin,ethereum").await;
    let overrides = CndConfigOverrides::default();
    let alice = env.new_actor(ActorName::Alice, &overrides).await.unwrap();
    let bob = env.new_actor(ActorName::Bob, &overrides).await.unwrap();
    alice.connect(&bob).await.unwrap();

    let factory = env
        .swap_factory()
        .unwrap()
        .with_settings(SwapSettings::default().with_instant_refund());
    let bodies = factory.new_swap(&alice, &bob).await.unwrap();
    let expiry = bodies.hbit_herc20.alice.alpha.absolute_expiry;
    alice
        .create_hbit_herc20_swap(bodies.hbit_herc20.alice)
        .await
        .unwrap();
    bob.create_hbit_herc20_swap(bodies.hbit_herc20.bob)
        .await
        .unwrap();

    alice.fund().await.unwrap();
    alice
        .assert_ledger_state(Side::Alpha, EscrowStatus::Funded)
        .await
        .unwrap();
    alice
        .wait_for_expiry(LedgerKind::Bitcoin, expiry)
        .await
        .unwrap();
    alice.refund().await.unwrap();

    alice.assert_refunded().await.unwrap();
    env.teardown().await;
}
