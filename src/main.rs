//! Telepuppet CLI entry point.
//!
//! Provides `check-config` to validate configuration and credentials, and
//! `replay` to run captured update envelopes through the dispatcher.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use telepuppet::config::{config_dir, load_config};
use telepuppet::credentials::load_credentials;
use telepuppet::puppet::bridge::{Bridge, BridgeError};
use telepuppet::puppet::session::SessionConfig;
use telepuppet::puppet::updates::{CanonicalEvent, Dispatcher, Sender};

/// Telepuppet: Telegram account puppeting for chat bridges.
#[derive(Parser)]
#[command(name = "telepuppet", version, about)]
struct Cli {
    /// Also write JSON logs, rotated daily, under this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Load config and credentials and print the resolved session settings.
    CheckConfig {
        /// Path to `config.toml` (default: `~/.telepuppet/config.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Path to the `.env` credentials file (default: `~/.telepuppet/.env`).
        #[arg(long)]
        env: Option<PathBuf>,
    },
    /// Feed raw update envelopes (one JSON object per line) through the
    /// dispatcher and print the canonical events as JSON lines.
    Replay {
        /// File of captured envelopes.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = match &cli.log_dir {
        Some(dir) => Some(telepuppet::logging::init_production(dir)?),
        None => {
            telepuppet::logging::init_cli();
            None
        }
    };

    match cli.command {
        Command::CheckConfig { config, env } => handle_check_config(config, env),
        Command::Replay { file } => handle_replay(file).await,
    }
}

/// Validate config and credentials, then print the merged session config.
fn handle_check_config(config: Option<PathBuf>, env: Option<PathBuf>) -> anyhow::Result<()> {
    let dir = config_dir()?;
    let config_path = config.unwrap_or_else(|| dir.join("config.toml"));
    let env_path = env.unwrap_or_else(|| dir.join(".env"));

    let config = load_config(&config_path)?;
    let credentials = load_credentials(&env_path)
        .with_context(|| format!("failed to load {}", env_path.display()))?;
    let settings = config.puppet_settings(&credentials)?;

    let session = SessionConfig::new(
        settings.api_id,
        settings.api_hash,
        settings.server,
        &settings.api_overrides,
    );
    let summary = serde_json::json!({
        "api": session.api,
        "server": session.server,
        "api_hash": "[REDACTED]",
        "refresh_interval_secs": settings.refresh_interval.as_secs(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Replay captured envelopes through a printing bridge.
async fn handle_replay(file: PathBuf) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let dispatcher = Dispatcher::new(Arc::new(PrintingBridge));
    let mut count: u64 = 0;
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(raw) => {
                dispatcher.handle_envelope(raw).await;
                count = count.saturating_add(1);
            }
            Err(e) => warn!(line = line_no.saturating_add(1), error = %e, "skipping invalid JSON"),
        }
    }
    info!(envelopes = count, "replay finished");
    Ok(())
}

/// Bridge that writes canonical events to stdout.
struct PrintingBridge;

#[async_trait]
impl Bridge for PrintingBridge {
    async fn handle_event(&self, event: CanonicalEvent) -> Result<(), BridgeError> {
        let line = serde_json::to_string(&event).map_err(|e| BridgeError::new(e.to_string()))?;
        println!("{line}");
        Ok(())
    }

    async fn resolve_account(&self, account_id: i64) -> Result<Sender, BridgeError> {
        Ok(Sender::from_id(account_id))
    }

    async fn sync_contacts(&self) -> Result<bool, BridgeError> {
        Ok(false)
    }

    async fn sync_dialogs(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}
