//! Swap Harness CLI
//!
//! Starts, inspects and stops the shared ledger environment used by swap
//! daemon end-to-end tests.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use swap_harness::config::{HarnessConfig, HarnessConfigOverrides};
use tracing_subscriber::EnvFilter;

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "swap-harness")]
#[command(about = "Swap Harness CLI - Manage ledger nodes for swap daemon tests", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Harness root directory (can also be set via SWAP_HARNESS_ROOT env var)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start ledgers and keep them running until Ctrl-C
    Start {
        /// Comma separated ledgers to start (bitcoin, ethereum, lightning or all)
        #[arg(short, long)]
        ledgers: Option<String>,

        /// Open lightning channels between Alice's and Bob's lnd
        #[arg(long)]
        channels: bool,
    },

    /// Show persisted ledgers and whether their processes are alive
    Status,

    /// Kill every recorded ledger and forget its config
    Stop,
}

impl Cli {
    /// Flags that take precedence over the environment.
    fn overrides(&self) -> HarnessConfigOverrides {
        HarnessConfigOverrides {
            root: self.root.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let default_filter = if cli.verbose {
        "swap_harness_cli=debug,swap_harness=debug"
    } else {
        "swap_harness_cli=info,swap_harness=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = HarnessConfig::from_env()?.merge(&cli.overrides());

    // Dispatch commands
    match cli.command {
        Commands::Start { ledgers, channels } => {
            commands::start::run(config, ledgers.as_deref(), channels, cli.verbose).await?;
        }
        Commands::Status => {
            commands::status::run(&config, cli.verbose).await?;
        }
        Commands::Stop => {
            commands::stop::run(&config, cli.verbose).await?;
        }
    }

    Ok(())
}
