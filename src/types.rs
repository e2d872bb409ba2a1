//! Shared types for the DIPBOT engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that feed, execution, and
//! engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lamports per SOL, used when converting fee settings for the executor.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// A monitored liquidity pool.
///
/// Orientation is normalised at discovery time: the quote side is always
/// SOL, so `price = quote / base` reads as SOL per token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// On-chain pool (AMM) account address.
    pub address: String,
    /// Display name, e.g. "BONK/WSOL".
    pub name: String,
    /// Mint of the non-SOL token.
    pub token_mint: String,
    pub base_vault: String,
    pub quote_vault: String,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    /// Minimum SOL (quote) reserve required before a drop can trigger a buy.
    pub min_sol_reserve: f64,
}

impl fmt::Display for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

impl PoolConfig {
    /// Token symbol (the part of the name before the slash).
    pub fn token_symbol(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// Convert a raw base-vault balance to UI units.
    pub fn scale_base(&self, raw: u64) -> f64 {
        raw as f64 / 10f64.powi(self.base_decimals as i32)
    }

    /// Convert a raw quote-vault balance to UI units.
    pub fn scale_quote(&self, raw: u64) -> f64 {
        raw as f64 / 10f64.powi(self.quote_decimals as i32)
    }

    #[cfg(test)]
    pub fn sample(address: &str) -> Self {
        PoolConfig {
            address: address.to_string(),
            name: format!("{address}/WSOL"),
            token_mint: format!("{address}-mint"),
            base_vault: format!("{address}-base-vault"),
            quote_vault: format!("{address}-quote-vault"),
            base_decimals: 6,
            quote_decimals: 9,
            min_sol_reserve: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Price observation
// ---------------------------------------------------------------------------

/// A single price sample derived from the pool's vault balances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub timestamp: DateTime<Utc>,
    /// SOL per token (quote / base).
    pub price: f64,
    pub base_reserve: f64,
    pub quote_reserve: f64,
}

impl fmt::Display for PriceObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.10} SOL (base={:.2} quote={:.2} SOL) @ {}",
            self.price,
            self.base_reserve,
            self.quote_reserve,
            self.timestamp.format("%H:%M:%S%.3f"),
        )
    }
}

impl PriceObservation {
    /// Build an observation from reserves already expressed in UI units.
    /// Returns `None` when the base side is empty or either side is not
    /// a finite number (no meaningful price).
    pub fn from_reserves(timestamp: DateTime<Utc>, base_reserve: f64, quote_reserve: f64) -> Option<Self> {
        if !base_reserve.is_finite() || !quote_reserve.is_finite() || base_reserve <= 0.0 {
            return None;
        }
        Some(Self {
            timestamp,
            price: quote_reserve / base_reserve,
            base_reserve,
            quote_reserve,
        })
    }

    /// Build an observation from raw vault balances, scaling by the
    /// pool's decimal exponents.
    pub fn from_raw_reserves(
        pool: &PoolConfig,
        timestamp: DateTime<Utc>,
        raw_base: u64,
        raw_quote: u64,
    ) -> Option<Self> {
        Self::from_reserves(timestamp, pool.scale_base(raw_base), pool.scale_quote(raw_quote))
    }

    #[cfg(test)]
    pub fn at(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            price,
            base_reserve: 1_000_000.0,
            quote_reserve: 1_000_000.0 * price,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution contract
// ---------------------------------------------------------------------------

/// Swap direction. Buy spends SOL for tokens, Sell spends tokens for SOL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Per-direction fee settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSettings {
    pub priority_fee_sol: Decimal,
    pub compute_price_sol: Decimal,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            priority_fee_sol: Decimal::new(1, 3),  // 0.001 SOL
            compute_price_sol: Decimal::new(1, 3), // 0.001 SOL
        }
    }
}

impl FeeSettings {
    pub fn priority_fee_lamports(&self) -> u64 {
        to_lamports(self.priority_fee_sol)
    }

    pub fn compute_price_lamports(&self) -> u64 {
        to_lamports(self.compute_price_sol)
    }
}

fn to_lamports(sol: Decimal) -> u64 {
    (sol * Decimal::from(LAMPORTS_PER_SOL))
        .trunc()
        .to_u64()
        .unwrap_or(0)
}

/// A swap request handed to the execution gateway.
///
/// `request_id` doubles as the idempotency key: a gateway that sees the
/// same id twice must not fill twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub request_id: Uuid,
    pub direction: Direction,
    pub pool: PoolConfig,
    /// SOL for a buy, tokens for a sell.
    pub amount_in: Decimal,
    /// Slippage bound: tokens for a buy, SOL for a sell.
    pub min_amount_out: Decimal,
    /// Pool price (SOL per token) the request was sized against.
    pub reference_price: f64,
    pub fees: FeeSettings,
}

impl fmt::Display for SwapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in={} min_out={} ref={:.10} [{}]",
            self.direction,
            self.pool.name,
            self.amount_in,
            self.min_amount_out,
            self.reference_price,
            self.request_id,
        )
    }
}

/// What the gateway knows about a submitted swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SwapOutcome {
    Confirmed { tx_id: String, filled_amount: Decimal },
    Failed { reason: String },
    /// Submitted but not (yet) confirmed either way.
    Unknown,
}

impl fmt::Display for SwapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapOutcome::Confirmed { tx_id, filled_amount } => {
                write!(f, "confirmed {filled_amount} (tx {tx_id})")
            }
            SwapOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            SwapOutcome::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// A qualifying price drop emitted by a pool watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub pool: PoolConfig,
    pub price: f64,
    /// High-water mark the drop was measured against.
    pub baseline: f64,
    pub drop_percentage: f64,
    pub quote_reserve: f64,
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dropped {:.2}% ({:.10} -> {:.10})",
            self.pool.name, self.drop_percentage, self.baseline, self.price,
        )
    }
}

// ---------------------------------------------------------------------------
// Trade cycle state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeState {
    Triggered,
    Buying,
    Bought,
    ProfitMonitoring,
    Selling,
    Completed,
    Failed,
}

impl TradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeState::Completed | TradeState::Failed)
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeState::Triggered => "TRIGGERED",
            TradeState::Buying => "BUYING",
            TradeState::Bought => "BOUGHT",
            TradeState::ProfitMonitoring => "PROFIT_MONITORING",
            TradeState::Selling => "SELLING",
            TradeState::Completed => "COMPLETED",
            TradeState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Why a position was sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    ProfitTarget,
    Timeout,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::ProfitTarget => write!(f, "profit target reached"),
            ExitReason::Timeout => write!(f, "profit timeout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Completed,
    Failed,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeOutcome::Completed => write!(f, "🟢 COMPLETED"),
            TradeOutcome::Failed => write!(f, "🔴 FAILED"),
        }
    }
}

/// Immutable record of a finished trade cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub cycle_id: Uuid,
    pub pool: PoolConfig,
    pub outcome: TradeOutcome,
    /// State the cycle was in when it ended (for failures: where it failed).
    pub final_state: TradeState,
    pub exit_reason: Option<ExitReason>,
    pub trigger_price: f64,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub sol_spent: Decimal,
    pub sol_received: Decimal,
    pub tokens_held: Decimal,
    pub pnl_sol: Decimal,
    pub pnl_percentage: f64,
    pub triggered_at: DateTime<Utc>,
    pub entered_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub buy_tx: Option<String>,
    pub sell_tx: Option<String>,
    /// Tokens are still in the wallet and need manual handling.
    pub position_held: bool,
    /// The gateway never resolved an `Unknown` submission; on-chain state
    /// must be checked by hand.
    pub needs_reconciliation: bool,
    pub failure_reason: Option<String>,
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.pnl_sol >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "{} {} | pnl={sign}{} SOL ({sign}{:.2}%) | held={} | {:.1}s",
            self.outcome,
            self.pool.name,
            self.pnl_sol.round_dp(6),
            self.pnl_percentage,
            self.position_held,
            self.elapsed_secs(),
        )
    }
}

impl TradeResult {
    /// Wall-clock seconds from trigger to finish.
    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.triggered_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn is_win(&self) -> bool {
        self.outcome == TradeOutcome::Completed && self.pnl_sol > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Price-feed errors. Always transient from the engine's point of view.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("Feed unavailable for {pool}: {message}")]
    Unavailable { pool: String, message: String },

    #[error("Stream closed for {pool}: {message}")]
    StreamClosed { pool: String, message: String },
}

/// Execution errors surfaced by the trade cycle once its retry budget is spent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{direction} rejected: {reason}")]
    Rejected { direction: Direction, reason: String },

    #[error("{direction} transport error: {message}")]
    Transport { direction: Direction, message: String },

    #[error("{direction} outcome still unknown after {attempts} attempts")]
    OutcomeUnknown { direction: Direction, attempts: u32 },

    #[error("{direction} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        direction: Direction,
        attempts: u32,
        last_error: String,
    },
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("price_drop_percentage ({min}) exceeds max_price_drop_percentage ({max})")]
    DropRangeInverted { min: f64, max: f64 },

    #[error("{section}: base backoff ({base_ms}ms) exceeds max backoff ({max_ms}ms)")]
    BackoffInverted {
        section: &'static str,
        base_ms: u64,
        max_ms: u64,
    },

    #[error("No pools configured for monitoring")]
    NoPools,
}

/// Domain-specific error types for DIPBOT.
#[derive(Debug, thiserror::Error)]
pub enum DipError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Trade slot busy: cycle {active_cycle} on {active_pool} is still in flight")]
    SlotBusy { active_cycle: Uuid, active_pool: String },

    #[error("Discovery error: {0}")]
    Discovery(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
