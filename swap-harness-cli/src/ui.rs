//! Terminal output of the ledger commands

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// What a command found out about one ledger lock directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerState {
    Running(u32),
    Stale(u32),
    MissingPid,
    Stopped(u32),
    Forgotten,
}

impl LedgerState {
    fn describe(self, name: &str) -> String {
        match self {
            Self::Running(pid) => format!("{} running (pid {})", name, pid),
            Self::Stale(pid) => format!("{} is stale (pid {} is gone)", name, pid),
            Self::MissingPid => format!("{} has no pid file", name),
            Self::Stopped(pid) => format!("{} (pid {}) stopped", name, pid),
            Self::Forgotten => format!("{} had no live process, config removed", name),
        }
    }

    fn is_healthy(self) -> bool {
        matches!(self, Self::Running(_) | Self::Stopped(_))
    }
}

/// Command title followed by the directory it works on.
pub fn banner(title: &str, label: &str, dir: &Path) {
    println!("\n{}", title.bold().underline());
    println!("  {}: {}", label.cyan(), dir.display());
}

/// One line per ledger, green when it is in the state the command wants.
pub fn ledger(name: &str, state: LedgerState) {
    println!("{}", "─".repeat(60).dimmed());
    let line = state.describe(name);
    if state.is_healthy() {
        println!("{} {}", "✓".green().bold(), line);
    } else {
        println!("{} {}", "⚠".yellow().bold(), line);
    }
}

/// Top-level scalar fields of a persisted ledger config, or all of it as JSON
/// when `verbose`.
pub fn ledger_config(config: &serde_json::Value, verbose: bool) {
    if verbose {
        if let Ok(pretty) = serde_json::to_string_pretty(config) {
            println!("{}", pretty);
        }
        return;
    }
    for (key, value) in scalar_fields(config) {
        println!("  {}: {}", key.cyan(), value);
    }
}

fn scalar_fields(config: &serde_json::Value) -> Vec<(&str, String)> {
    let Some(fields) = config.as_object() else {
        return Vec::new();
    };
    fields
        .iter()
        .filter(|(_, v)| !v.is_object())
        .map(|(key, value)| {
            let value = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            (key.as_str(), value)
        })
        .collect()
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Spinner while ledgers warm up; a plain line when stdout is not a terminal.
pub fn spinner(message: &str) -> ProgressBar {
    if !console::Term::stdout().is_term() {
        info(message);
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
