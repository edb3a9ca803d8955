//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The account credential is referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::types::{BuySettings, Channel, Item};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub buy_settings: BuySettings,
    /// Watch-list of item ids. Empty selects deal-feed mode.
    #[serde(default)]
    pub limiteds: Vec<u64>,
    /// One worker per proxy; none means a single local worker.
    #[serde(default)]
    pub proxies: Vec<String>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    /// Name of the env var holding the `.ROBLOSECURITY` cookie.
    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            cookie_env: default_cookie_env(),
        }
    }
}

fn default_cookie_env() -> String {
    "ROBLOSECURITY".to_string()
}

/// Batch sizes and loop cadences.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub catalog_batch_size: usize,
    pub marketplace_batch_size: usize,
    pub deal_batch_size: usize,
    pub idle_secs: u64,
    pub error_backoff_secs: u64,
    pub deal_empty_backoff_secs: u64,
    pub account_refresh_secs: u64,
    pub account_error_backoff_secs: u64,
    pub summary_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            catalog_batch_size: 120,
            marketplace_batch_size: 30,
            deal_batch_size: 120,
            idle_secs: 1,
            error_backoff_secs: 10,
            deal_empty_backoff_secs: 60,
            account_refresh_secs: 30,
            account_error_backoff_secs: 10,
            summary_interval_secs: 60,
        }
    }
}

impl PollingConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn deal_empty_backoff(&self) -> Duration {
        Duration::from_secs(self.deal_empty_backoff_secs)
    }

    pub fn account_refresh(&self) -> Duration {
        Duration::from_secs(self.account_refresh_secs)
    }

    pub fn account_error_backoff(&self) -> Duration {
        Duration::from_secs(self.account_error_backoff_secs)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        for key in config.buy_settings.custom.keys() {
            key.parse::<u64>()
                .with_context(|| format!("custom_settings key is not an item id: {key}"))?;
        }
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The account cookie, read from the configured env var.
    pub fn cookie(&self) -> Result<SecretString> {
        let raw = Self::resolve_env(&self.account.cookie_env)?;
        let trimmed = raw.trim();
        anyhow::ensure!(
            !trimmed.is_empty(),
            "Environment variable {} is empty",
            self.account.cookie_env
        );
        Ok(SecretString::new(trimmed.to_string()))
    }

    /// One channel per configured proxy, or a single local channel.
    pub fn channels(&self) -> Vec<Channel> {
        let proxies: Vec<Channel> = self
            .proxies
            .iter()
            .map(|p| Channel::from_proxy(Some(p)))
            .filter(|c| *c != Channel::Local)
            .collect();
        if proxies.is_empty() {
            vec![Channel::Local]
        } else {
            proxies
        }
    }

    pub fn watch_list(&self) -> Vec<Item> {
        self.limiteds.iter().copied().map(Item::watched).collect()
    }
}
