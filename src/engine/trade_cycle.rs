//! Trade cycle: the single in-flight position.
//!
//! `Triggered → Buying → Bought → ProfitMonitoring → Selling → Completed`,
//! with `Failed` reachable from any execution step. The `TradeSlot` holds
//! at most one cycle; the runner drives it through the execution gateway
//! with bounded retries and reports every transition.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use rust_decimal::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::EngineSettings;
use crate::execution::ExecutionGateway;
use crate::feed::{ObservationStream, PriceFeed};
use crate::notify::{BotEvent, Notifier};
use crate::types::{
    DipError, Direction, ExecutionError, ExitReason, FeeSettings, FeedError, PoolConfig,
    PriceObservation, SwapOutcome, SwapRequest, TradeOutcome, TradeResult, TradeState, Trigger,
};

const SOL_DECIMALS: u32 = 9;

// ---------------------------------------------------------------------------
// Cycle record
// ---------------------------------------------------------------------------

/// Mutable record of the in-flight position.
#[derive(Debug, Clone)]
pub struct TradeCycle {
    pub id: Uuid,
    pub pool: PoolConfig,
    pub state: TradeState,
    pub trigger: Trigger,
    pub admitted_at: DateTime<Utc>,
    pub entry_price: Option<f64>,
    pub entered_at: Option<DateTime<Utc>>,
    pub sol_spent: Decimal,
    pub tokens_held: Decimal,
    pub sol_received: Decimal,
    pub exit_price: Option<f64>,
    pub buy_attempts: u32,
    pub sell_attempts: u32,
    /// Monotonic profit-monitoring deadline.
    pub deadline: Option<Instant>,
    pub exit_reason: Option<ExitReason>,
    pub buy_tx: Option<String>,
    pub sell_tx: Option<String>,
    pub last_error: Option<ExecutionError>,
}

impl TradeCycle {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool: trigger.pool.clone(),
            state: TradeState::Triggered,
            trigger,
            admitted_at: Utc::now(),
            entry_price: None,
            entered_at: None,
            sol_spent: Decimal::ZERO,
            tokens_held: Decimal::ZERO,
            sol_received: Decimal::ZERO,
            exit_price: None,
            buy_attempts: 0,
            sell_attempts: 0,
            deadline: None,
            exit_reason: None,
            buy_tx: None,
            sell_tx: None,
            last_error: None,
        }
    }

    fn attempts_mut(&mut self, direction: Direction) -> &mut u32 {
        match direction {
            Direction::Buy => &mut self.buy_attempts,
            Direction::Sell => &mut self.sell_attempts,
        }
    }

    /// Freeze the cycle into its result record.
    pub fn result(&self) -> TradeResult {
        let (outcome, pnl_sol, pnl_percentage) = match self.state {
            TradeState::Completed => {
                let pnl = self.sol_received - self.sol_spent;
                let pct = match (self.entry_price, self.exit_price) {
                    (Some(entry), Some(exit)) if entry > 0.0 => (exit - entry) / entry * 100.0,
                    _ => 0.0,
                };
                (TradeOutcome::Completed, pnl, pct)
            }
            _ => (TradeOutcome::Failed, Decimal::ZERO, 0.0),
        };

        let needs_reconciliation = matches!(
            self.last_error,
            Some(ExecutionError::OutcomeUnknown { direction: Direction::Buy, .. })
        );

        TradeResult {
            cycle_id: self.id,
            pool: self.pool.clone(),
            outcome,
            final_state: self.state,
            exit_reason: self.exit_reason,
            trigger_price: self.trigger.price,
            entry_price: self.entry_price,
            exit_price: self.exit_price,
            sol_spent: self.sol_spent,
            sol_received: self.sol_received,
            tokens_held: self.tokens_held,
            pnl_sol,
            pnl_percentage,
            triggered_at: self.trigger.observed_at,
            entered_at: self.entered_at,
            finished_at: Utc::now(),
            buy_tx: self.buy_tx.clone(),
            sell_tx: self.sell_tx.clone(),
            position_held: self.state == TradeState::Failed && self.tokens_held > Decimal::ZERO,
            needs_reconciliation,
            failure_reason: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// Holder of at most one trade cycle.
#[derive(Debug, Default)]
pub struct TradeSlot {
    active: Option<TradeCycle>,
}

impl TradeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the cycle for `trigger`. Fails if a cycle is already in flight.
    pub fn admit(&mut self, trigger: Trigger) -> Result<&mut TradeCycle, DipError> {
        if let Some(active) = &self.active {
            return Err(DipError::SlotBusy {
                active_cycle: active.id,
                active_pool: active.pool.name.clone(),
            });
        }
        Ok(self.active.insert(TradeCycle::new(trigger)))
    }

    pub fn release(&mut self) -> Option<TradeCycle> {
        self.active.take()
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Exit decision for one profit-monitoring evaluation. Profit wins when
/// both conditions hold.
pub fn exit_signal(price: f64, target: f64, now: Instant, deadline: Instant) -> Option<ExitReason> {
    if price >= target {
        Some(ExitReason::ProfitTarget)
    } else if now >= deadline {
        Some(ExitReason::Timeout)
    } else {
        None
    }
}

/// `now + timeout`, clamped to a far-future instant instead of overflowing.
fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// `amount * price * (1 - slippage%)`, rounded to `dp`. Zero (no bound)
/// when the inputs cannot be represented.
fn slippage_bound(amount: Decimal, price: f64, slippage: f64, dp: u32) -> Decimal {
    let (Some(price), Some(keep)) = (
        Decimal::from_f64(price),
        Decimal::from_f64(1.0 - slippage / 100.0),
    ) else {
        return Decimal::ZERO;
    };
    (amount * price * keep).round_dp(dp).max(Decimal::ZERO)
}

async fn next_observation(stream: &mut Option<ObservationStream>) -> Option<Result<PriceObservation, FeedError>> {
    match stream {
        Some(s) => s.next().await,
        None => futures::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct TradeCycleRunner {
    gateway: Arc<dyn ExecutionGateway>,
    feed: Arc<dyn PriceFeed>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl TradeCycleRunner {
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        feed: Arc<dyn PriceFeed>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            gateway,
            feed,
            notifier,
            settings,
        }
    }

    /// Drive `cycle` to a terminal state and return its result.
    pub async fn run(&self, cycle: &mut TradeCycle) -> TradeResult {
        // -- Buy ------------------------------------------------------------
        self.transition(cycle, TradeState::Buying);

        let amount = self.settings.trade_amount;
        let trigger_price = cycle.trigger.price;
        let tokens_per_sol = if trigger_price > 0.0 { 1.0 / trigger_price } else { 0.0 };
        let min_tokens = slippage_bound(
            amount,
            tokens_per_sol,
            self.settings.slippage,
            cycle.pool.base_decimals as u32,
        );

        let (buy_tx, tokens) = match self
            .execute(cycle, Direction::Buy, amount, min_tokens, trigger_price, self.settings.buy_fees)
            .await
        {
            Ok(fill) => fill,
            Err(e) => return self.fail(cycle, e),
        };

        cycle.sol_spent = amount;
        cycle.tokens_held = tokens;
        cycle.buy_tx = Some(buy_tx.clone());
        let entry_price = if tokens > Decimal::ZERO {
            (amount / tokens).to_f64().unwrap_or(trigger_price)
        } else {
            trigger_price
        };
        cycle.entry_price = Some(entry_price);
        self.transition(cycle, TradeState::Bought);

        self.notifier.notify(BotEvent::BuyConfirmed {
            cycle_id: cycle.id,
            pool: cycle.pool.clone(),
            sol_spent: amount,
            tokens,
            entry_price,
            tx_id: buy_tx,
        });

        // -- Monitor --------------------------------------------------------
        cycle.entered_at = Some(Utc::now());
        cycle.deadline = Some(deadline_after(Instant::now(), self.settings.profit_timeout));
        self.transition(cycle, TradeState::ProfitMonitoring);

        let (reason, last_price) = self.monitor_profit(cycle).await;
        cycle.exit_reason = Some(reason);

        // -- Sell -----------------------------------------------------------
        self.transition(cycle, TradeState::Selling);

        let tokens_sold = cycle.tokens_held;
        let min_sol = slippage_bound(tokens_sold, last_price, self.settings.slippage, SOL_DECIMALS);
        let (sell_tx, sol_received) = match self
            .execute(cycle, Direction::Sell, tokens_sold, min_sol, last_price, self.settings.sell_fees)
            .await
        {
            Ok(fill) => fill,
            Err(e) => return self.fail(cycle, e),
        };

        let exit_price = if tokens_sold > Decimal::ZERO {
            (sol_received / tokens_sold).to_f64().unwrap_or(last_price)
        } else {
            last_price
        };
        cycle.sol_received = sol_received;
        cycle.exit_price = Some(exit_price);
        cycle.tokens_held = Decimal::ZERO;
        cycle.sell_tx = Some(sell_tx.clone());

        self.notifier.notify(BotEvent::SellConfirmed {
            cycle_id: cycle.id,
            pool: cycle.pool.clone(),
            tokens: tokens_sold,
            sol_received,
            exit_price,
            reason,
            tx_id: sell_tx,
        });

        self.transition(cycle, TradeState::Completed);
        cycle.result()
    }

    fn transition(&self, cycle: &mut TradeCycle, to: TradeState) {
        let from = cycle.state;
        cycle.state = to;
        info!(cycle = %cycle.id, pool = %cycle.pool.name, %from, %to, "Trade state");
        self.notifier.notify(BotEvent::StateChanged {
            cycle_id: cycle.id,
            pool: cycle.pool.name.clone(),
            from,
            to,
        });
    }

    fn fail(&self, cycle: &mut TradeCycle, err: ExecutionError) -> TradeResult {
        error!(cycle = %cycle.id, pool = %cycle.pool.name, state = %cycle.state, error = %err, "Trade cycle failed");
        let failed_in = cycle.state;
        cycle.last_error = Some(err);
        self.transition(cycle, TradeState::Failed);

        // The result reports where the cycle failed, not the terminal state.
        let mut result = cycle.result();
        result.final_state = failed_in;
        result
    }

    /// Submit a swap with bounded retries. An `Unknown` outcome is never
    /// re-submitted blindly: the next attempt checks its status, and a new
    /// request id is only used once the earlier one is known to have failed.
    async fn execute(
        &self,
        cycle: &mut TradeCycle,
        direction: Direction,
        amount_in: Decimal,
        min_amount_out: Decimal,
        reference_price: f64,
        fees: FeeSettings,
    ) -> Result<(String, Decimal), ExecutionError> {
        let policy = self.settings.execution_retry;
        let mut pending: Option<Uuid> = None;
        let mut last_error = String::new();
        let mut attempts = 0;

        while policy.allows(attempts) {
            attempts += 1;
            *cycle.attempts_mut(direction) = attempts;

            let delay = policy.delay_for(attempts);
            if !delay.is_zero() {
                debug!(%direction, attempt = attempts, delay_ms = delay.as_millis() as u64, "Retrying swap");
                tokio::time::sleep(delay).await;
            }

            let (request_id, outcome) = match pending {
                Some(id) => (id, self.gateway.check_status(id).await),
                None => {
                    let request = SwapRequest {
                        request_id: Uuid::new_v4(),
                        direction,
                        pool: cycle.pool.clone(),
                        amount_in,
                        min_amount_out,
                        reference_price,
                        fees,
                    };
                    info!(pool = %cycle.pool.name, attempt = attempts, %request, "Submitting swap");
                    (request.request_id, self.gateway.submit_swap(&request).await)
                }
            };

            match outcome {
                Ok(SwapOutcome::Confirmed { tx_id, filled_amount }) => {
                    info!(%direction, pool = %cycle.pool.name, tx = %tx_id, filled = %filled_amount, "Swap confirmed");
                    return Ok((tx_id, filled_amount));
                }
                Ok(SwapOutcome::Failed { reason }) => {
                    warn!(%direction, pool = %cycle.pool.name, attempt = attempts, reason = %reason, "Swap failed");
                    cycle.last_error = Some(ExecutionError::Rejected { direction, reason: reason.clone() });
                    pending = None;
                    last_error = reason;
                }
                Ok(SwapOutcome::Unknown) => {
                    warn!(%direction, pool = %cycle.pool.name, attempt = attempts, %request_id, "Swap outcome unknown");
                    pending = Some(request_id);
                }
                Err(e) => {
                    warn!(%direction, pool = %cycle.pool.name, attempt = attempts, error = %e, "Swap transport error");
                    cycle.last_error = Some(ExecutionError::Transport { direction, message: e.to_string() });
                    last_error = e.to_string();
                    // A failed status check says nothing about the earlier request.
                }
            }
        }

        if pending.is_some() {
            Err(ExecutionError::OutcomeUnknown { direction, attempts })
        } else {
            Err(ExecutionError::RetriesExhausted { direction, attempts, last_error })
        }
    }

    /// Watch the pool until the profit target or the deadline. Feed loss is
    /// tolerated: the stream is reopened with backoff while the deadline
    /// keeps running.
    async fn monitor_profit(&self, cycle: &TradeCycle) -> (ExitReason, f64) {
        let entry = cycle.entry_price.unwrap_or(cycle.trigger.price);
        let target = entry * (1.0 + self.settings.profit_target_percentage / 100.0);
        let deadline = cycle
            .deadline
            .unwrap_or_else(|| deadline_after(Instant::now(), self.settings.profit_timeout));
        let retry = self.settings.watcher_retry;

        info!(
            pool = %cycle.pool.name,
            entry = format!("{:.10}", entry),
            target = format!("{:.10}", target),
            timeout_secs = self.settings.profit_timeout.as_secs(),
            "Monitoring for profit"
        );

        let mut last_price = entry;
        let mut stream: Option<ObservationStream> = None;
        let mut failures: u32 = 0;
        let mut resubscribe_at = Instant::now();

        let mut poll = tokio::time::interval(self.settings.profit_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if let Some(reason) = exit_signal(last_price, target, Instant::now(), deadline) {
                let change = (last_price - entry) / entry * 100.0;
                info!(
                    pool = %cycle.pool.name,
                    %reason,
                    price = format!("{:.10}", last_price),
                    change = format!("{:+.2}%", change),
                    "Exit condition met"
                );
                return (reason, last_price);
            }

            if stream.is_none() && Instant::now() >= resubscribe_at {
                match self.feed.subscribe(&cycle.pool).await {
                    Ok(s) => {
                        stream = Some(s);
                        failures = 0;
                    }
                    Err(e) => {
                        failures += 1;
                        resubscribe_at = Instant::now() + retry.delay_for(failures + 1);
                        warn!(pool = %cycle.pool.name, error = %e, "Profit monitor feed unavailable");
                    }
                }
            }

            tokio::select! {
                item = next_observation(&mut stream) => match item {
                    Some(Ok(obs)) => last_price = obs.price,
                    Some(Err(e)) => {
                        warn!(pool = %cycle.pool.name, error = %e, "Profit monitor feed lost");
                        stream = None;
                        failures += 1;
                        resubscribe_at = Instant::now() + retry.delay_for(failures + 1);
                    }
                    None => {
                        debug!(pool = %cycle.pool.name, "Profit monitor stream ended");
                        stream = None;
                        failures += 1;
                        resubscribe_at = Instant::now() + retry.delay_for(failures + 1);
                    }
                },
                _ = poll.tick() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::retry::RetryPolicy;
    use crate::execution::MockExecutionGateway;
    use crate::notify::LogNotifier;
    use async_trait::async_trait;
    use futures::stream;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn trigger(price: f64) -> Trigger {
        Trigger {
            pool: PoolConfig::sample("BONK"),
            price,
            baseline: price * 1.1,
            drop_percentage: 9.09,
            quote_reserve: 1_000.0,
            observed_at: Utc::now(),
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            profit_target_percentage: 10.0,
            profit_timeout: Duration::from_secs(60 * 60),
            trade_amount: dec!(0.1),
            slippage: 1.0,
            execution_retry: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)),
            watcher_retry: RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)),
            profit_poll_interval: Duration::from_secs(1),
            ..EngineSettings::default()
        }
    }

    /// Feed whose subscriptions play back scripted (delay, price) steps,
    /// then stay silent.
    struct ScriptFeed {
        scripts: Mutex<Vec<Vec<(Duration, f64)>>>,
    }

    impl ScriptFeed {
        fn new(scripts: Vec<Vec<(Duration, f64)>>) -> Self {
            Self { scripts: Mutex::new(scripts) }
        }
    }

    #[async_trait]
    impl PriceFeed for ScriptFeed {
        async fn subscribe(&self, _pool: &PoolConfig) -> Result<ObservationStream, FeedError> {
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() { Vec::new() } else { scripts.remove(0) }
            };
            let steps = stream::iter(script).then(|(delay, price)| async move {
                tokio::time::sleep(delay).await;
                Ok(PriceObservation::at(Utc::now(), price))
            });
            Ok(steps.chain(stream::pending()).boxed())
        }
    }

    fn runner(gateway: MockExecutionGateway, feed: ScriptFeed) -> TradeCycleRunner {
        TradeCycleRunner::new(Arc::new(gateway), Arc::new(feed), Arc::new(LogNotifier), settings())
    }

    #[test]
    fn test_exit_signal_profit_wins_over_timeout() {
        let now = Instant::now();
        let past = now - Duration::from_secs(1);
        assert_eq!(exit_signal(1.10, 1.10, now, past), Some(ExitReason::ProfitTarget));
        assert_eq!(exit_signal(1.05, 1.10, now, past), Some(ExitReason::Timeout));
        assert_eq!(exit_signal(1.05, 1.10, now, now + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_deadline_after_does_not_overflow() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(60)), now + Duration::from_secs(60));
        assert!(deadline_after(now, Duration::MAX) > now + Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn test_slippage_bound() {
        assert_eq!(slippage_bound(dec!(100), 1.0, 1.0, 9), dec!(99));
        assert_eq!(slippage_bound(dec!(0.1), 2.0, 50.0, 9), dec!(0.1));
        assert_eq!(slippage_bound(dec!(1), f64::NAN, 1.0, 9), Decimal::ZERO);
    }

    #[test]
    fn test_slot_admits_one_cycle() {
        let mut slot = TradeSlot::new();
        let id = slot.admit(trigger(1.0)).unwrap().id;

        let err = slot.admit(trigger(2.0)).unwrap_err();
        match err {
            DipError::SlotBusy { active_cycle, .. } => assert_eq!(active_cycle, id),
            other => panic!("unexpected error {other}"),
        }

        assert_eq!(slot.release().map(|c| c.id), Some(id));
        assert!(slot.release().is_none());
        assert!(slot.admit(trigger(2.0)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_profit_target_sells_before_timeout() {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit_swap().times(2).returning(|req| {
            Ok(SwapOutcome::Confirmed {
                tx_id: format!("{}-tx", req.direction),
                filled_amount: match req.direction {
                    Direction::Buy => dec!(0.1),
                    Direction::Sell => dec!(0.11),
                },
            })
        });
        gw.expect_check_status().never();

        let feed = ScriptFeed::new(vec![vec![(Duration::from_secs(600), 1.10)]]);
        let runner = runner(gw, feed);

        let mut cycle = TradeCycle::new(trigger(1.0));
        let result = runner.run(&mut cycle).await;

        assert_eq!(result.outcome, TradeOutcome::Completed);
        assert_eq!(result.exit_reason, Some(ExitReason::ProfitTarget));
        assert_eq!(result.entry_price, Some(1.0));
        assert_eq!(result.pnl_sol, dec!(0.01));
        assert!((result.pnl_percentage - 10.0).abs() < 1e-6);
        assert_eq!(result.buy_tx.as_deref(), Some("BUY-tx"));
        assert_eq!(result.sell_tx.as_deref(), Some("SELL-tx"));
        assert!(!result.position_held);
        assert_eq!(cycle.state, TradeState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exit_when_price_flat() {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit_swap().times(2).returning(|req| {
            Ok(SwapOutcome::Confirmed {
                tx_id: "tx".into(),
                filled_amount: match req.direction {
                    Direction::Buy => dec!(0.1),
                    Direction::Sell => dec!(0.099),
                },
            })
        });

        let feed = ScriptFeed::new(vec![vec![(Duration::from_secs(5), 1.01)]]);
        let runner = runner(gw, feed);
        let start = Instant::now();

        let mut cycle = TradeCycle::new(trigger(1.0));
        let result = runner.run(&mut cycle).await;

        assert_eq!(result.exit_reason, Some(ExitReason::Timeout));
        assert!(Instant::now() - start >= Duration::from_secs(3600));
        assert!(result.pnl_sol < Decimal::ZERO);
        assert!(!result.is_win());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_buy_exhausts_attempts_and_fails() {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit_swap().times(1).returning(|_| Ok(SwapOutcome::Unknown));
        gw.expect_check_status().times(2).returning(|_| Ok(SwapOutcome::Unknown));

        let runner = runner(gw, ScriptFeed::new(Vec::new()));
        let mut cycle = TradeCycle::new(trigger(1.0));
        let result = runner.run(&mut cycle).await;

        assert_eq!(result.outcome, TradeOutcome::Failed);
        assert_eq!(result.final_state, TradeState::Buying);
        assert!(result.needs_reconciliation);
        assert!(!result.position_held);
        assert_eq!(cycle.buy_attempts, 3);
        assert_eq!(cycle.state, TradeState::Failed);
        assert!(matches!(
            cycle.last_error,
            Some(ExecutionError::OutcomeUnknown { direction: Direction::Buy, attempts: 3 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_then_failed_resubmits_with_new_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_submit = seen.clone();

        let mut gw = MockExecutionGateway::new();
        let mut submits = 0;
        gw.expect_submit_swap().times(2).returning(move |req| {
            seen_submit.lock().unwrap().push(req.request_id);
            submits += 1;
            if submits == 1 {
                Ok(SwapOutcome::Unknown)
            } else {
                Ok(SwapOutcome::Confirmed {
                    tx_id: "tx".into(),
                    filled_amount: req.amount_in,
                })
            }
        });
        gw.expect_check_status().times(1).returning(|_| {
            Ok(SwapOutcome::Failed {
                reason: "blockhash expired".into(),
            })
        });

        let execution_retry = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(10));
        let runner = TradeCycleRunner::new(
            Arc::new(gw),
            Arc::new(ScriptFeed::new(Vec::new())),
            Arc::new(LogNotifier),
            EngineSettings { execution_retry, ..settings() },
        );

        let mut cycle = TradeCycle::new(trigger(1.0));
        let fill = runner
            .execute(&mut cycle, Direction::Buy, dec!(0.1), Decimal::ZERO, 1.0, FeeSettings::default())
            .await
            .unwrap();
        assert_eq!(fill.1, dec!(0.1));
        assert_eq!(cycle.buy_attempts, 3);

        let ids = seen.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_failure_keeps_position() {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit_swap().times(4).returning(|req| match req.direction {
            Direction::Buy => Ok(SwapOutcome::Confirmed {
                tx_id: "buy".into(),
                filled_amount: dec!(200),
            }),
            Direction::Sell => Err(anyhow::anyhow!("rpc timeout")),
        });

        let feed = ScriptFeed::new(vec![vec![(Duration::from_secs(1), 1.0)]]);
        let runner = runner(gw, feed);
        let mut cycle = TradeCycle::new(trigger(0.0005));
        let result = runner.run(&mut cycle).await;

        assert_eq!(result.outcome, TradeOutcome::Failed);
        assert_eq!(result.final_state, TradeState::Selling);
        assert!(result.position_held);
        assert_eq!(result.tokens_held, dec!(200));
        assert!(!result.needs_reconciliation);
        assert!(result.failure_reason.unwrap().contains("rpc timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_survives_feed_loss() {
        let mut gw = MockExecutionGateway::new();
        gw.expect_submit_swap().times(2).returning(|req| {
            Ok(SwapOutcome::Confirmed {
                tx_id: "tx".into(),
                filled_amount: match req.direction {
                    Direction::Buy => dec!(0.1),
                    Direction::Sell => dec!(0.12),
                },
            })
        });

        // The first subscription ends right away; the second delivers the target.
        struct FlakyFeed {
            calls: Mutex<u32>,
        }

        #[async_trait]
        impl PriceFeed for FlakyFeed {
            async fn subscribe(&self, pool: &PoolConfig) -> Result<ObservationStream, FeedError> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                match *calls {
                    1 => Ok(stream::empty().boxed()),
                    2 => Err(FeedError::Unavailable {
                        pool: pool.name.clone(),
                        message: "down".into(),
                    }),
                    _ => Ok(stream::iter(vec![Ok(PriceObservation::at(Utc::now(), 1.2))])
                        .chain(stream::pending())
                        .boxed()),
                }
            }
        }

        let runner = TradeCycleRunner::new(
            Arc::new(gw),
            Arc::new(FlakyFeed { calls: Mutex::new(0) }),
            Arc::new(LogNotifier),
            settings(),
        );
        let mut cycle = TradeCycle::new(trigger(1.0));
        let result = runner.run(&mut cycle).await;
        assert_eq!(result.exit_reason, Some(ExitReason::ProfitTarget));
        assert_eq!(result.outcome, TradeOutcome::Completed);
    }
}
