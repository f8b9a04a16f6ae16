//! Configuration loading.
//!
//! `config.toml` holds account-independent bridge settings. Secrets are
//! referenced by `.env` key name and resolved through [`Credentials`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::credentials::Credentials;
use crate::puppet::session::{ApiOverrides, ServerConfig};
use crate::puppet::PuppetSettings;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Protocol API settings.
    pub telegram: TelegramConfig,

    /// Puppet session behaviour.
    #[serde(default)]
    pub puppet: PuppetConfig,
}

/// Protocol API settings.
#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    /// Application id issued by the protocol operator.
    pub api_id: i32,

    /// `.env` key holding the application secret.
    #[serde(default = "default_api_hash_env")]
    pub api_hash_env: String,

    /// Server endpoint descriptor.
    #[serde(default)]
    pub server: ServerConfig,

    /// Protocol-version overrides.
    #[serde(default)]
    pub api: ApiOverrides,
}

/// Puppet session behaviour.
#[derive(Debug, Deserialize)]
pub struct PuppetConfig {
    /// Seconds between background protocol-state polls.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for PuppetConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

// Default value functions for serde

fn default_api_hash_env() -> String {
    "TELEPUPPET_API_HASH".to_owned()
}
fn default_refresh_interval_secs() -> u64 {
    5
}

impl Config {
    /// Resolve the settings shared by every puppet, pulling the API secret
    /// from `credentials`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is missing or the refresh interval is zero.
    pub fn puppet_settings(&self, credentials: &Credentials) -> anyhow::Result<PuppetSettings> {
        if self.puppet.refresh_interval_secs == 0 {
            anyhow::bail!("puppet.refresh_interval_secs must be greater than zero");
        }
        let api_hash = credentials.require_secret(&self.telegram.api_hash_env)?;
        Ok(PuppetSettings {
            api_id: self.telegram.api_id,
            api_hash,
            server: self.telegram.server.clone(),
            api_overrides: self.telegram.api.clone(),
            refresh_interval: Duration::from_secs(self.puppet.refresh_interval_secs),
        })
    }
}

/// Load the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.telepuppet/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".telepuppet"))
}
