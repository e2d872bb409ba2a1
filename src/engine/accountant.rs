//! Accountant: trade stats, daily P&L and held positions.
//!
//! Folds each finished trade cycle into `BotState`: counts, wins/losses,
//! cumulative P&L, a per-day bucket that rolls over at UTC midnight, and
//! the list of positions that still need manual handling.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{PoolConfig, TradeOutcome, TradeResult, TradeState};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Stats for one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub failed: u32,
    pub pnl_sol: Decimal,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            trades: 0,
            wins: 0,
            losses: 0,
            failed: 0,
            pnl_sol: Decimal::ZERO,
        }
    }
}

/// Tokens left in the wallet by a cycle that could not sell (or whose buy
/// outcome was never resolved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPosition {
    pub cycle_id: Uuid,
    pub pool: String,
    pub token_mint: String,
    pub tokens: Decimal,
    pub sol_spent: Decimal,
    pub entry_price: Option<f64>,
    pub since: DateTime<Utc>,
    pub needs_reconciliation: bool,
    pub reason: String,
}

/// Persistent bot state, saved after every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub started_at: DateTime<Utc>,
    pub trades_completed: u64,
    pub trades_failed: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl_sol: Decimal,
    pub total_sol_spent: Decimal,
    pub today: DailyStats,
    #[serde(default)]
    pub held_positions: Vec<HeldPosition>,
}

impl BotState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            trades_completed: 0,
            trades_failed: 0,
            wins: 0,
            losses: 0,
            total_pnl_sol: Decimal::ZERO,
            total_sol_spent: Decimal::ZERO,
            today: DailyStats::new(now.date_naive()),
            held_positions: Vec::new(),
        }
    }

    /// Win rate over completed trades (0–100).
    pub fn win_rate(&self) -> f64 {
        if self.trades_completed == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trades_completed as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Start a new day bucket if `now` is past the current one.
    /// Returns the finished day's stats.
    pub fn roll_day(state: &mut BotState, now: DateTime<Utc>) -> Option<DailyStats> {
        let today = now.date_naive();
        if today <= state.today.date {
            return None;
        }
        let finished = std::mem::replace(&mut state.today, DailyStats::new(today));
        info!(
            date = %finished.date,
            trades = finished.trades,
            pnl = format!("{:.6} SOL", finished.pnl_sol),
            "Day closed"
        );
        Some(finished)
    }

    /// Fold a finished trade into the state. Returns the previous day's
    /// stats if this result opened a new day.
    pub fn record(state: &mut BotState, result: &TradeResult) -> Option<DailyStats> {
        let rolled = Self::roll_day(state, result.finished_at);

        state.today.trades += 1;
        state.total_sol_spent += result.sol_spent;

        match result.outcome {
            TradeOutcome::Completed => {
                state.trades_completed += 1;
                state.total_pnl_sol += result.pnl_sol;
                state.today.pnl_sol += result.pnl_sol;
                if result.is_win() {
                    state.wins += 1;
                    state.today.wins += 1;
                } else {
                    state.losses += 1;
                    state.today.losses += 1;
                }
            }
            TradeOutcome::Failed => {
                state.trades_failed += 1;
                state.today.failed += 1;
            }
        }

        if result.position_held || result.needs_reconciliation {
            Self::hold(
                state,
                HeldPosition {
                    cycle_id: result.cycle_id,
                    pool: result.pool.name.clone(),
                    token_mint: result.pool.token_mint.clone(),
                    tokens: result.tokens_held,
                    sol_spent: result.sol_spent,
                    entry_price: result.entry_price,
                    since: result.finished_at,
                    needs_reconciliation: result.needs_reconciliation,
                    reason: result
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| format!("failed in {}", result.final_state)),
                },
            );
        }

        info!(
            pool = %result.pool.name,
            outcome = ?result.outcome,
            pnl = format!("{:.6} SOL", result.pnl_sol),
            total_pnl = format!("{:.6} SOL", state.total_pnl_sol),
            win_rate = format!("{:.1}%", state.win_rate()),
            "Trade recorded"
        );

        rolled
    }

    /// Record a cycle abandoned at shutdown. Only cycles that may hold
    /// tokens become held positions.
    pub fn record_abandoned(
        state: &mut BotState,
        cycle_id: Uuid,
        pool: &PoolConfig,
        at_state: TradeState,
        tokens: Decimal,
        sol_spent: Decimal,
        now: DateTime<Utc>,
    ) {
        let may_hold = matches!(
            at_state,
            TradeState::Buying | TradeState::Bought | TradeState::ProfitMonitoring | TradeState::Selling
        );
        if !may_hold {
            return;
        }
        Self::hold(
            state,
            HeldPosition {
                cycle_id,
                pool: pool.name.clone(),
                token_mint: pool.token_mint.clone(),
                tokens,
                sol_spent,
                entry_price: None,
                since: now,
                needs_reconciliation: at_state == TradeState::Buying,
                reason: format!("abandoned at shutdown in {at_state}"),
            },
        );
    }

    fn hold(state: &mut BotState, position: HeldPosition) {
        warn!(
            pool = %position.pool,
            tokens = %position.tokens,
            reconcile = position.needs_reconciliation,
            reason = %position.reason,
            "Position requires manual intervention"
        );
        state.held_positions.retain(|p| p.cycle_id != position.cycle_id);
        state.held_positions.push(position);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
