//! Core engine: the watch → trigger → trade → resume loop.

pub mod accountant;
pub mod mev_guard;
pub mod retry;
pub mod scheduler;
pub mod trade_cycle;
pub mod watcher;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

use crate::engine::retry::RetryPolicy;
use crate::types::FeeSettings;

/// Typed runtime settings shared by the watcher, trade cycle and scheduler.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Minimum drop (percent from the high-water mark) that triggers a buy.
    pub price_drop_percentage: f64,
    /// Drops beyond this are treated as a rug and ignored.
    pub max_price_drop_percentage: f64,
    pub profit_target_percentage: f64,
    pub profit_timeout: Duration,
    /// SOL spent per trade.
    pub trade_amount: Decimal,
    /// Slippage tolerance in percent.
    pub slippage: f64,
    pub mev_pump_threshold: f64,
    pub mev_time_window: chrono::Duration,
    pub mev_history_size: usize,
    pub buy_fees: FeeSettings,
    pub sell_fees: FeeSettings,
    pub execution_retry: RetryPolicy,
    pub watcher_retry: RetryPolicy,
    pub profit_poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            price_drop_percentage: 7.0,
            max_price_drop_percentage: 37.0,
            profit_target_percentage: 5.0,
            profit_timeout: Duration::from_secs(5 * 60),
            trade_amount: dec!(0.1),
            slippage: 1.0,
            mev_pump_threshold: 5.0,
            mev_time_window: chrono::Duration::seconds(30),
            mev_history_size: 64,
            buy_fees: FeeSettings::default(),
            sell_fees: FeeSettings::default(),
            execution_retry: RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(10)),
            watcher_retry: RetryPolicy::new(6, Duration::from_secs(1), Duration::from_secs(30)),
            profit_poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(120),
        }
    }
}
