//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! API credentials are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::types::BotError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: StrategyConfig,
    pub exchange: ExchangeConfig,
}

/// Strategy parameters for one run. Immutable once the loop is started.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StrategyConfig {
    /// Trading pair, e.g. `SHIBUSDT`.
    pub symbol: String,
    /// Base order notional in quote currency.
    pub buy_amount: Decimal,
    /// Fractional drop from entry that triggers an averaging buy.
    pub max_drop_percent: Decimal,
    /// Fractional rise from entry that triggers the take-profit sell.
    pub target_increment: Decimal,
    /// Fractional rise from entry that triggers a breakout buy.
    #[serde(alias = "alcista_increment")]
    pub breakout_increment: Decimal,
    /// Milliseconds between ticks.
    pub poll_interval_ms: u64,
    /// Highest multiplier allowed to place an add-on buy.
    pub martingale_limit: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Simulate fills against live prices instead of sending orders.
    #[serde(default)]
    pub dry_run: bool,
    /// Step size used by the paper gateway when the price source has none.
    #[serde(default)]
    pub paper_step_size: Option<Decimal>,
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_api_key_env() -> String {
    "APIKEY".to_string()
}

fn default_api_secret_env() -> String {
    "SECRET".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(contents)?;
        config.bot = config.bot.validated()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

impl StrategyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check value ranges and normalize the symbol to upper case.
    pub fn validated(mut self) -> Result<Self, BotError> {
        self.symbol = self.symbol.trim().to_uppercase();
        if self.symbol.is_empty() {
            return Err(BotError::Config("symbol must not be empty".into()));
        }

        let positive = [
            ("buy_amount", self.buy_amount),
            ("max_drop_percent", self.max_drop_percent),
            ("target_increment", self.target_increment),
            ("breakout_increment", self.breakout_increment),
        ];
        for (name, value) in positive {
            if value <= Decimal::ZERO {
                return Err(BotError::Config(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(BotError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.martingale_limit == 0 {
            return Err(BotError::Config("martingale_limit must be >= 1".into()));
        }
        Ok(self)
    }
}
