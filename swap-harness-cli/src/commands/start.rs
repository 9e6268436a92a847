//! Start command - bring up ledgers and hold them until Ctrl-C

use anyhow::{Context, Result};
use swap_harness::actor::ActorName;
use swap_harness::config::HarnessConfig;
use swap_harness::environment::{Environment, LedgerSelection, DEFAULT_CHANNEL_CAPACITY};
use swap_harness::wallets::lightning::LightningWallet;

use crate::ui;

pub async fn run(
    config: HarnessConfig,
    ledgers: Option<&str>,
    channels: bool,
    verbose: bool,
) -> Result<()> {
    let config = match ledgers {
        Some(value) => config.with_ledgers(LedgerSelection::parse(value)?),
        None => config,
    };

    ui::banner("Starting Ledgers", "Root", &config.root);
    ui::info(&format!("Ledgers: {}", config.ledgers));

    if verbose {
        tracing::debug!(locks = %config.locks_dir().display(), "lock directory");
    }

    let spinner = ui::spinner("Waiting for ledgers to warm up...");
    let started = Environment::start(config).await;
    spinner.finish_and_clear();
    let mut env = started.context("Failed to start ledgers")?;
    ui::success("Ledgers running");

    ui::ledger_config(&serde_json::to_value(env.ledgers())?, true);

    if channels {
        if let Err(e) = open_channels(&env).await {
            ui::error(&format!("Failed to open lightning channels: {:#}", e));
            env.teardown().await;
            return Err(e);
        }
    }

    ui::info("Press Ctrl-C to stop");
    let interrupted = tokio::signal::ctrl_c().await;

    let spinner = ui::spinner("Stopping ledgers...");
    env.teardown().await;
    spinner.finish_and_clear();
    interrupted.context("Failed to listen for Ctrl-C")?;

    ui::success("Ledgers stopped");
    Ok(())
}

async fn open_channels(env: &Environment) -> Result<()> {
    let (Some(alice), Some(bob)) = (
        env.lnd_config(ActorName::Alice),
        env.lnd_config(ActorName::Bob),
    ) else {
        anyhow::bail!("lightning channels need the lightning ledger (use --ledgers lightning)");
    };

    let faucet = env.bitcoin_faucet()?.clone();
    let alice = LightningWallet::new_instance(alice, faucet.clone()).await?;
    let bob = LightningWallet::new_instance(bob, faucet).await?;

    let spinner = ui::spinner("Opening lightning channels...");
    let opened = Environment::setup_lightning_channels(&alice, &bob, DEFAULT_CHANNEL_CAPACITY).await;
    spinner.finish_and_clear();
    opened?;

    ui::success(&format!(
        "Opened {} sat channels in both directions",
        DEFAULT_CHANNEL_CAPACITY
    ));
    Ok(())
}
