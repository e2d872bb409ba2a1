//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (Telegram token) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`. Every numeric option is
//! validated before anything starts; a bad value is a [`ConfigError`].

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::retry::RetryPolicy;
use crate::engine::EngineSettings;
use crate::types::{ConfigError, FeeSettings, PoolConfig};

/// Longest MEV suppression window (one day).
pub const MAX_MEV_WINDOW_SECS: u64 = 86_400;
/// Longest profit-monitoring timeout (one week).
pub const MAX_PROFIT_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 3_600;
/// Ceiling for poll, pacing and backoff intervals (one hour).
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub buy_settings: FeeConfig,
    #[serde(default)]
    pub sell_settings: FeeConfig,
    #[serde(default = "RetryConfig::execution_default")]
    pub execution_retry: RetryConfig,
    #[serde(default = "RetryConfig::watcher_default")]
    pub watcher_retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub feed: FeedConfig,
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// Route swaps to the paper gateway instead of a live executor.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default)]
    pub state_file: Option<String>,
}

/// The trading thresholds consumed by the watcher and trade cycle.
#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    pub price_drop_percentage: f64,
    pub max_price_drop_percentage: f64,
    pub profit_target_percentage: f64,
    pub profit_timeout_minutes: u64,
    /// SOL spent per trade.
    pub trade_amount: Decimal,
    /// Slippage tolerance in percent.
    pub slippage: f64,
    #[serde(default)]
    pub min_sol_reserve: f64,
    #[serde(default = "default_pump_threshold")]
    pub mev_protection_pump_threshold: f64,
    /// Seconds after a pump during which drops are ignored.
    #[serde(default = "default_mev_window")]
    pub mev_protection_time_window: u64,
    #[serde(default = "default_mev_history")]
    pub mev_protection_history_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeeConfig {
    pub priority_fee_sol: Decimal,
    pub compute_price_sol: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        let fees = FeeSettings::default();
        Self {
            priority_fee_sol: fees.priority_fee_sol,
            compute_price_sol: fees.compute_price_sol,
        }
    }
}

impl From<&FeeConfig> for FeeSettings {
    fn from(cfg: &FeeConfig) -> Self {
        FeeSettings {
            priority_fee_sol: cfg.priority_fee_sol,
            compute_price_sol: cfg.compute_price_sol,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    fn execution_default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
        }
    }

    fn watcher_default() -> Self {
        Self {
            max_attempts: 6,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        RetryPolicy::new(
            cfg.max_attempts,
            Duration::from_millis(cfg.base_backoff_ms),
            Duration::from_millis(cfg.max_backoff_ms),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// How often the profit monitor re-evaluates without a fresh price.
    pub profit_poll_interval_ms: u64,
    /// How long shutdown waits for an in-flight trade cycle.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            profit_poll_interval_ms: 1_000,
            shutdown_grace_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    /// JSON file with recorded vault balances per pool.
    pub replay_path: String,
    #[serde(default = "default_replay_interval")]
    pub replay_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum DiscoveryConfig {
    /// Pools fully described in the config file.
    Static { pools: Vec<StaticPoolConfig> },
    /// Pools resolved through the Raydium API from token mints.
    Raydium { tokens: Vec<TokenConfig> },
}

#[derive(Debug, Deserialize, Clone)]
pub struct StaticPoolConfig {
    pub address: String,
    pub name: String,
    pub token_mint: String,
    pub base_vault: String,
    pub quote_vault: String,
    pub base_decimals: u8,
    pub quote_decimals: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    /// Mint of the token to trade against WSOL.
    pub out_token: String,
    /// Overrides the pool name returned by the API.
    #[serde(default)]
    pub token_pair: Option<String>,
    /// Overrides the pool address returned by the API.
    #[serde(default)]
    pub pair_address: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_pump_threshold() -> f64 {
    5.0
}

fn default_mev_window() -> u64 {
    30
}

fn default_mev_history() -> usize {
    64
}

fn default_replay_interval() -> u64 {
    500
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Check every recognised option. Fails on the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.trading;

        positive("price_drop_percentage", t.price_drop_percentage)?;
        positive("max_price_drop_percentage", t.max_price_drop_percentage)?;
        if t.max_price_drop_percentage >= 100.0 {
            return Err(ConfigError::Invalid {
                field: "max_price_drop_percentage",
                reason: format!("must be below 100, got {}", t.max_price_drop_percentage),
            });
        }
        if t.price_drop_percentage > t.max_price_drop_percentage {
            return Err(ConfigError::DropRangeInverted {
                min: t.price_drop_percentage,
                max: t.max_price_drop_percentage,
            });
        }
        positive("profit_target_percentage", t.profit_target_percentage)?;
        if t.profit_timeout_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "profit_timeout_minutes",
                reason: "must be at least 1 minute".to_string(),
            });
        }
        at_most("profit_timeout_minutes", t.profit_timeout_minutes, MAX_PROFIT_TIMEOUT_MINUTES)?;
        if t.trade_amount <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                field: "trade_amount",
                reason: format!("must be positive, got {}", t.trade_amount),
            });
        }
        positive("slippage", t.slippage)?;
        if t.slippage > 100.0 {
            return Err(ConfigError::Invalid {
                field: "slippage",
                reason: format!("must not exceed 100, got {}", t.slippage),
            });
        }
        if !t.min_sol_reserve.is_finite() || t.min_sol_reserve < 0.0 {
            return Err(ConfigError::Invalid {
                field: "min_sol_reserve",
                reason: format!("must be zero or positive, got {}", t.min_sol_reserve),
            });
        }
        positive("mev_protection_pump_threshold", t.mev_protection_pump_threshold)?;
        if t.mev_protection_time_window == 0 {
            return Err(ConfigError::Invalid {
                field: "mev_protection_time_window",
                reason: "must be at least 1 second".to_string(),
            });
        }
        at_most("mev_protection_time_window", t.mev_protection_time_window, MAX_MEV_WINDOW_SECS)?;
        if t.mev_protection_history_size == 0 {
            return Err(ConfigError::Invalid {
                field: "mev_protection_history_size",
                reason: "must hold at least one observation".to_string(),
            });
        }

        for (field, fees) in [("buy_settings", &self.buy_settings), ("sell_settings", &self.sell_settings)] {
            if fees.priority_fee_sol < Decimal::ZERO || fees.compute_price_sol < Decimal::ZERO {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "fees must not be negative".to_string(),
                });
            }
        }

        check_retry("execution_retry", &self.execution_retry)?;
        check_retry("watcher_retry", &self.watcher_retry)?;

        if self.scheduler.profit_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "profit_poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        at_most("profit_poll_interval_ms", self.scheduler.profit_poll_interval_ms, MAX_INTERVAL_MS)?;
        at_most("shutdown_grace_secs", self.scheduler.shutdown_grace_secs, MAX_SHUTDOWN_GRACE_SECS)?;
        at_most("replay_interval_ms", self.feed.replay_interval_ms, MAX_INTERVAL_MS)?;

        let empty = match &self.discovery {
            DiscoveryConfig::Static { pools } => pools.is_empty(),
            DiscoveryConfig::Raydium { tokens } => tokens.is_empty(),
        };
        if empty {
            return Err(ConfigError::NoPools);
        }

        Ok(())
    }

    /// Runtime settings for the engine.
    pub fn engine_settings(&self) -> EngineSettings {
        let t = &self.trading;
        EngineSettings {
            price_drop_percentage: t.price_drop_percentage,
            max_price_drop_percentage: t.max_price_drop_percentage,
            profit_target_percentage: t.profit_target_percentage,
            profit_timeout: Duration::from_secs(t.profit_timeout_minutes.min(MAX_PROFIT_TIMEOUT_MINUTES) * 60),
            trade_amount: t.trade_amount,
            slippage: t.slippage,
            mev_pump_threshold: t.mev_protection_pump_threshold,
            mev_time_window: chrono::Duration::seconds(t.mev_protection_time_window.min(MAX_MEV_WINDOW_SECS) as i64),
            mev_history_size: t.mev_protection_history_size,
            buy_fees: FeeSettings::from(&self.buy_settings),
            sell_fees: FeeSettings::from(&self.sell_settings),
            execution_retry: RetryPolicy::from(&self.execution_retry),
            watcher_retry: RetryPolicy::from(&self.watcher_retry),
            profit_poll_interval: Duration::from_millis(self.scheduler.profit_poll_interval_ms),
            shutdown_grace: Duration::from_secs(self.scheduler.shutdown_grace_secs),
        }
    }

    /// Pools described directly in the config (static discovery only).
    pub fn static_pools(&self) -> Vec<PoolConfig> {
        match &self.discovery {
            DiscoveryConfig::Static { pools } => pools
                .iter()
                .map(|p| PoolConfig {
                    address: p.address.clone(),
                    name: p.name.clone(),
                    token_mint: p.token_mint.clone(),
                    base_vault: p.base_vault.clone(),
                    quote_vault: p.quote_vault.clone(),
                    base_decimals: p.base_decimals,
                    quote_decimals: p.quote_decimals,
                    min_sol_reserve: self.trading.min_sol_reserve,
                })
                .collect(),
            DiscoveryConfig::Raydium { .. } => Vec::new(),
        }
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {value}"),
        });
    }
    Ok(())
}

fn at_most(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must not exceed {max}, got {value}"),
        });
    }
    Ok(())
}

fn check_retry(section: &'static str, retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::Invalid {
            field: section,
            reason: "max_attempts must be at least 1".to_string(),
        });
    }
    at_most(section, retry.max_backoff_ms, MAX_INTERVAL_MS)?;
    if retry.base_backoff_ms > retry.max_backoff_ms {
        return Err(ConfigError::BackoffInverted {
            section,
            base_ms: retry.base_backoff_ms,
            max_ms: retry.max_backoff_ms,
        });
    }
    Ok(())
}
