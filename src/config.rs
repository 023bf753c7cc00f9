//! Configuration loading and persistence.
//!
//! Settings live in `config.json` under the platform config directory
//! (overridable with `WALLET_CHANNEL_CONFIG_DIR`). Environment variables are
//! applied on top of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::relay::{RelayConfig, DEFAULT_RELAY_URL};

/// Default popup / native target.
pub const DEFAULT_KEYS_URL: &str = "https://keys.coinbase.com/connect";

/// Configuration for the wallet-channel CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// URL the popup and native transports open.
    pub keys_url: String,
    /// Base URL of the relay server.
    pub relay_url: String,
    /// Relay heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Delay between relay reconnect attempts in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Relay request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Fetch events published while offline after each relay authentication.
    pub fetch_unseen_events: bool,
    /// Key-value store for keys and sessions. Defaults to `storage.json` next
    /// to the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keys_url: DEFAULT_KEYS_URL.to_string(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            heartbeat_interval_ms: 10_000,
            reconnect_delay_ms: 5_000,
            request_timeout_ms: 60_000,
            fetch_unseen_events: true,
            storage_path: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `WALLET_CHANNEL_CONFIG_DIR` wins over the platform config dir
    /// (macOS: ~/Library/Application Support/wallet-channel).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("WALLET_CHANNEL_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("wallet-channel")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|e| {
            log::debug!("Using default config: {e:#}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(keys_url) = std::env::var("WALLET_CHANNEL_KEYS_URL") {
            self.keys_url = keys_url;
        }

        if let Ok(relay_url) = std::env::var("WALLET_CHANNEL_RELAY_URL") {
            self.relay_url = relay_url;
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Path of the key-value store.
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("storage.json")),
        }
    }

    /// Settings for [`RelayConnection`](crate::relay::RelayConnection).
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            relay_url: self.relay_url.clone(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            fetch_unseen_events: self.fetch_unseen_events,
        }
    }
}
