//! Notifications.
//!
//! Defines `BotEvent`, the `Notifier` trait and the log/composite
//! notifiers. Notifiers are fire-and-forget: `notify` never blocks the
//! engine, and delivery errors stay inside the notifier.

pub mod telegram;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::accountant::DailyStats;
use crate::types::{ExitReason, PoolConfig, TradeOutcome, TradeResult, TradeState, Trigger};

/// Everything the engine reports.
#[derive(Debug, Clone)]
pub enum BotEvent {
    Started {
        pools: Vec<PoolConfig>,
        price_drop_percentage: f64,
        max_price_drop_percentage: f64,
        profit_target_percentage: f64,
        trade_amount: Decimal,
        slippage: f64,
        dry_run: bool,
    },
    TriggerAdmitted {
        cycle_id: Uuid,
        trigger: Trigger,
    },
    TriggerDiscarded {
        trigger: Trigger,
    },
    StateChanged {
        cycle_id: Uuid,
        pool: String,
        from: TradeState,
        to: TradeState,
    },
    BuyConfirmed {
        cycle_id: Uuid,
        pool: PoolConfig,
        sol_spent: Decimal,
        tokens: Decimal,
        entry_price: f64,
        tx_id: String,
    },
    SellConfirmed {
        cycle_id: Uuid,
        pool: PoolConfig,
        tokens: Decimal,
        sol_received: Decimal,
        exit_price: f64,
        reason: ExitReason,
        tx_id: String,
    },
    TradeFinished(TradeResult),
    PoolExcluded {
        pool: PoolConfig,
        reason: String,
    },
    PositionAbandoned {
        cycle_id: Uuid,
        pool: PoolConfig,
        state: TradeState,
    },
    DailySummary(DailyStats),
    Stopped {
        reason: String,
        at: DateTime<Utc>,
    },
}

/// Abstraction over event sinks. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: BotEvent);
}

// ---------------------------------------------------------------------------
// Log notifier
// ---------------------------------------------------------------------------

/// Mirrors every event into the structured log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: BotEvent) {
        match event {
            BotEvent::Started { pools, dry_run, .. } => {
                info!(pools = pools.len(), dry_run, "Bot started");
            }
            BotEvent::TriggerAdmitted { cycle_id, trigger } => {
                info!(
                    %cycle_id,
                    pool = %trigger.pool.name,
                    price = format!("{:.10}", trigger.price),
                    drop = format!("{:.2}%", trigger.drop_percentage),
                    "Trigger admitted"
                );
            }
            BotEvent::TriggerDiscarded { trigger } => {
                info!(
                    pool = %trigger.pool.name,
                    drop = format!("{:.2}%", trigger.drop_percentage),
                    "Trigger discarded, trade slot busy"
                );
            }
            BotEvent::StateChanged { cycle_id, pool, from, to } => {
                info!(%cycle_id, pool = %pool, %from, %to, "Trade state changed");
            }
            BotEvent::BuyConfirmed { pool, sol_spent, tokens, entry_price, tx_id, .. } => {
                info!(
                    pool = %pool.name,
                    sol = %sol_spent,
                    tokens = %tokens,
                    entry = format!("{:.10}", entry_price),
                    tx = %tx_id,
                    "Buy confirmed"
                );
            }
            BotEvent::SellConfirmed { pool, sol_received, exit_price, reason, tx_id, .. } => {
                info!(
                    pool = %pool.name,
                    sol = %sol_received,
                    exit = format!("{:.10}", exit_price),
                    %reason,
                    tx = %tx_id,
                    "Sell confirmed"
                );
            }
            BotEvent::TradeFinished(result) => match result.outcome {
                TradeOutcome::Completed => info!(%result, "Trade finished"),
                TradeOutcome::Failed => warn!(
                    %result,
                    reason = result.failure_reason.as_deref().unwrap_or("unknown"),
                    "Trade failed"
                ),
            },
            BotEvent::PoolExcluded { pool, reason } => {
                warn!(pool = %pool.name, reason = %reason, "Pool excluded from monitoring");
            }
            BotEvent::PositionAbandoned { cycle_id, pool, state } => {
                warn!(%cycle_id, pool = %pool.name, %state, "Position abandoned at shutdown");
            }
            BotEvent::DailySummary(stats) => {
                info!(
                    date = %stats.date,
                    trades = stats.trades,
                    wins = stats.wins,
                    pnl = format!("{:.6} SOL", stats.pnl_sol),
                    "Daily summary"
                );
            }
            BotEvent::Stopped { reason, .. } => {
                info!(reason = %reason, "Bot stopped");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// Fans each event out to several notifiers.
#[derive(Default)]
pub struct CompositeNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for CompositeNotifier {
    fn notify(&self, event: BotEvent) {
        for sink in &self.sinks {
            sink.notify(event.clone());
        }
    }
}
