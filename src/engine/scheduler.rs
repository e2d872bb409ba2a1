//! Opportunity scheduler: fans in every pool watcher and feeds the single
//! trade slot.
//!
//! One watcher task per pool reports over an mpsc channel. The first
//! trigger received is admitted and its trade cycle runs inline on this
//! task, so no other cycle can start until it finishes. Closed watchers are
//! restarted while it runs. Triggers that arrive meanwhile are discarded
//! once the slot frees, and their watchers restarted fresh.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::accountant::{Accountant, BotState};
use crate::engine::mev_guard::{MevGuard, MevWindow};
use crate::engine::trade_cycle::{TradeCycleRunner, TradeSlot};
use crate::engine::watcher::{spawn_watcher, WatcherSignal};
use crate::engine::EngineSettings;
use crate::execution::ExecutionGateway;
use crate::feed::PriceFeed;
use crate::notify::{BotEvent, Notifier};
use crate::storage;
use crate::types::{PoolConfig, TradeResult, Trigger};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    AllPoolsExcluded,
}

/// What happened over the scheduler's lifetime.
#[derive(Debug, Clone)]
pub struct SchedulerReport {
    pub stop_reason: StopReason,
    pub results: Vec<TradeResult>,
    pub triggers_discarded: u64,
    pub excluded: Vec<PoolConfig>,
    /// Cycle left unfinished when the shutdown grace period ran out.
    pub abandoned: Option<uuid::Uuid>,
    pub state: BotState,
}

/// How an admitted cycle ended.
enum CycleEnd {
    Finished,
    /// Finished, but shutdown was requested while it ran.
    FinishedThenStop,
    Abandoned,
}

// ---------------------------------------------------------------------------
// Watchers
// ---------------------------------------------------------------------------

/// The running watcher tasks, their MEV windows and closure streaks.
struct Watchers {
    feed: Arc<dyn PriceFeed>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
    guard: MevGuard,
    handles: HashMap<String, JoinHandle<()>>,
    /// Consecutive closures without a single observation, per pool.
    empty_closures: HashMap<String, u32>,
    tx: mpsc::Sender<WatcherSignal>,
    rx: mpsc::Receiver<WatcherSignal>,
    /// Triggers that fired while the slot was busy.
    parked: Vec<Trigger>,
    triggers_discarded: u64,
    excluded: Vec<PoolConfig>,
}

impl Watchers {
    fn new(feed: Arc<dyn PriceFeed>, notifier: Arc<dyn Notifier>, settings: EngineSettings, pools: usize) -> Self {
        let (tx, rx) = mpsc::channel(pools.max(1) * 2);
        Self {
            guard: MevGuard::new(&settings),
            feed,
            notifier,
            settings,
            handles: HashMap::new(),
            empty_closures: HashMap::new(),
            tx,
            rx,
            parked: Vec::new(),
            triggers_discarded: 0,
            excluded: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn start(&mut self, pool: PoolConfig, delay: Duration) {
        let window = self.guard.checkout(&pool.address);
        let address = pool.address.clone();
        let handle = spawn_watcher(pool, window, self.feed.clone(), &self.settings, delay, self.tx.clone());
        if let Some(previous) = self.handles.insert(address, handle) {
            previous.abort();
        }
    }

    /// Take back a triggered watcher's window. The pool has no watcher
    /// until it is started again.
    fn claim(&mut self, pool: &PoolConfig, window: MevWindow) {
        self.guard.checkin(&pool.address, window);
        self.handles.remove(&pool.address);
        self.empty_closures.remove(&pool.address);
    }

    /// Handle a signal while a cycle holds the slot, or a non-trigger
    /// signal while idle. Triggers are parked until the slot frees.
    fn handle(&mut self, signal: WatcherSignal) {
        match signal {
            WatcherSignal::Triggered { trigger, window } => {
                self.claim(&trigger.pool, window);
                debug!(pool = %trigger.pool.name, "Trigger while slot busy, parking");
                self.parked.push(trigger);
            }
            WatcherSignal::Closed {
                pool,
                reason,
                observations_seen,
                window,
            } => {
                self.guard.checkin(&pool.address, window);
                self.handles.remove(&pool.address);

                let streak = self.empty_closures.entry(pool.address.clone()).or_insert(0);
                if observations_seen > 0 {
                    *streak = 0;
                } else {
                    *streak += 1;
                }
                let delay = self.settings.watcher_retry.delay_for(*streak + 1);

                info!(
                    pool = %pool.name,
                    reason = %reason,
                    seen = observations_seen,
                    restart_ms = delay.as_millis() as u64,
                    "Watcher closed, restarting"
                );
                self.start(pool, delay);
            }
            WatcherSignal::Excluded { pool, reason, window } => {
                self.guard.checkin(&pool.address, window);
                self.handles.remove(&pool.address);
                self.empty_closures.remove(&pool.address);
                self.notifier.notify(BotEvent::PoolExcluded {
                    pool: pool.clone(),
                    reason,
                });
                self.excluded.push(pool);
            }
        }
    }

    /// Once the slot is free: handle whatever is still queued, then
    /// discard every parked trigger and restart its watcher fresh.
    fn drain(&mut self) {
        while let Ok(signal) = self.rx.try_recv() {
            self.handle(signal);
        }
        for trigger in std::mem::take(&mut self.parked) {
            let pool = trigger.pool.clone();
            self.triggers_discarded += 1;
            self.notifier.notify(BotEvent::TriggerDiscarded { trigger });
            self.start(pool, Duration::ZERO);
        }
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    pools: Vec<PoolConfig>,
    notifier: Arc<dyn Notifier>,
    runner: TradeCycleRunner,
    shutdown_grace: Duration,
    watchers: Watchers,
    slot: TradeSlot,
    state: BotState,
    state_path: Option<String>,
    results: Vec<TradeResult>,
}

impl Scheduler {
    pub fn new(
        pools: Vec<PoolConfig>,
        feed: Arc<dyn PriceFeed>,
        gateway: Arc<dyn ExecutionGateway>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        let runner = TradeCycleRunner::new(gateway, feed.clone(), notifier.clone(), settings.clone());
        Self {
            shutdown_grace: settings.shutdown_grace,
            watchers: Watchers::new(feed, notifier.clone(), settings, pools.len()),
            pools,
            notifier,
            runner,
            slot: TradeSlot::new(),
            state: BotState::new(Utc::now()),
            state_path: None,
            results: Vec::new(),
        }
    }

    /// Resume from previously saved state.
    pub fn with_state(mut self, state: BotState) -> Self {
        self.state = state;
        self
    }

    /// Save state to `path` after every cycle and at shutdown.
    pub fn with_persistence(mut self, path: impl Into<String>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Run until `shutdown` resolves or every pool has been excluded.
    pub async fn run<F>(mut self, shutdown: F) -> Result<SchedulerReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        for pool in self.pools.clone() {
            self.watchers.start(pool, Duration::ZERO);
        }
        info!(pools = self.watchers.len(), "Scheduler started");

        let mut abandoned = None;
        let stop_reason = loop {
            if self.watchers.is_empty() {
                warn!("Every pool has been excluded, stopping");
                break StopReason::AllPoolsExcluded;
            }

            let signal = tokio::select! {
                _ = shutdown.as_mut() => break StopReason::Shutdown,
                signal = self.watchers.rx.recv() => signal,
            };
            let Some(signal) = signal else {
                break StopReason::Shutdown;
            };

            match signal {
                WatcherSignal::Triggered { trigger, window } => {
                    let pool = trigger.pool.clone();
                    self.watchers.claim(&pool, window);

                    match self.run_cycle(trigger, shutdown.as_mut()).await {
                        CycleEnd::Finished => {
                            self.watchers.drain();
                            self.watchers.start(pool, Duration::ZERO);
                        }
                        CycleEnd::FinishedThenStop => break StopReason::Shutdown,
                        CycleEnd::Abandoned => {
                            abandoned = self.abandon();
                            break StopReason::Shutdown;
                        }
                    }
                }
                other => self.watchers.handle(other),
            }
        };

        self.watchers.abort_all();
        self.persist();

        info!(
            reason = ?stop_reason,
            cycles = self.results.len(),
            discarded = self.watchers.triggers_discarded,
            excluded = self.watchers.excluded.len(),
            "Scheduler stopped"
        );

        Ok(SchedulerReport {
            stop_reason,
            results: self.results,
            triggers_discarded: self.watchers.triggers_discarded,
            excluded: self.watchers.excluded,
            abandoned,
            state: self.state,
        })
    }

    /// Admit `trigger` and drive its cycle to a terminal state. Watcher
    /// closures and exclusions are handled while it runs. If shutdown fires
    /// meanwhile, the cycle gets the grace period to finish.
    async fn run_cycle<F>(&mut self, trigger: Trigger, mut shutdown: Pin<&mut F>) -> CycleEnd
    where
        F: Future<Output = ()>,
    {
        let cycle = match self.slot.admit(trigger) {
            Ok(cycle) => cycle,
            Err(e) => {
                warn!(error = %e, "Trigger rejected");
                return CycleEnd::Finished;
            }
        };

        self.notifier.notify(BotEvent::TriggerAdmitted {
            cycle_id: cycle.id,
            trigger: cycle.trigger.clone(),
        });

        let grace = self.shutdown_grace;
        let watchers = &mut self.watchers;
        let mut deadline: Option<Instant> = None;
        let result = {
            let run = self.runner.run(cycle);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    result = &mut run => break Some(result),
                    _ = shutdown.as_mut(), if deadline.is_none() => {
                        info!(grace_secs = grace.as_secs(), "Shutdown requested, waiting for trade cycle");
                        deadline = Some(Instant::now() + grace);
                    }
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        break None;
                    }
                    Some(signal) = watchers.rx.recv() => watchers.handle(signal),
                }
            }
        };

        let Some(result) = result else {
            return CycleEnd::Abandoned;
        };

        self.slot.release();
        self.record(result);

        if deadline.is_some() {
            CycleEnd::FinishedThenStop
        } else {
            CycleEnd::Finished
        }
    }

    fn record(&mut self, result: TradeResult) {
        self.notifier.notify(BotEvent::TradeFinished(result.clone()));
        if let Some(day) = Accountant::record(&mut self.state, &result) {
            self.notifier.notify(BotEvent::DailySummary(day));
        }
        self.results.push(result);
        self.persist();
    }

    /// Release a cycle cut off by the grace period and report it.
    fn abandon(&mut self) -> Option<uuid::Uuid> {
        let cycle = self.slot.release()?;
        warn!(cycle = %cycle.id, pool = %cycle.pool.name, state = %cycle.state, "Trade cycle abandoned");
        Accountant::record_abandoned(
            &mut self.state,
            cycle.id,
            &cycle.pool,
            cycle.state,
            cycle.tokens_held,
            cycle.sol_spent,
            Utc::now(),
        );
        self.notifier.notify(BotEvent::PositionAbandoned {
            cycle_id: cycle.id,
            pool: cycle.pool.clone(),
            state: cycle.state,
        });
        Some(cycle.id)
    }

    fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        if let Err(e) = storage::save_state(&self.state, Some(path)) {
            warn!(error = %e, "Failed to save state");
        }
    }
}
