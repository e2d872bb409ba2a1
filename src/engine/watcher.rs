//! Pool watcher: one lightweight task per monitored pool.
//!
//! Consumes the pool's observation stream, tracks the trailing high-water
//! mark, feeds the MEV window, and emits exactly one terminal signal:
//! a trigger, a closure, or an exclusion when the feed never comes up.

use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::mev_guard::MevWindow;
use crate::engine::retry::RetryPolicy;
use crate::engine::EngineSettings;
use crate::feed::{ObservationStream, PriceFeed};
use crate::types::{PoolConfig, PriceObservation, Trigger};

/// Terminal outcome of a watcher. Every variant hands the MEV window back
/// to the scheduler.
#[derive(Debug)]
pub enum WatcherSignal {
    Triggered {
        trigger: Trigger,
        window: MevWindow,
    },
    Closed {
        pool: PoolConfig,
        reason: String,
        observations_seen: u64,
        window: MevWindow,
    },
    /// The feed could not be subscribed within the retry budget.
    Excluded {
        pool: PoolConfig,
        reason: String,
        window: MevWindow,
    },
}

impl WatcherSignal {
    pub fn pool(&self) -> &PoolConfig {
        match self {
            WatcherSignal::Triggered { trigger, .. } => &trigger.pool,
            WatcherSignal::Closed { pool, .. } | WatcherSignal::Excluded { pool, .. } => pool,
        }
    }
}

pub struct PoolWatcher {
    pool: PoolConfig,
    min_drop: f64,
    max_drop: f64,
    window: MevWindow,
    baseline: Option<f64>,
    seen: u64,
}

impl PoolWatcher {
    pub fn new(pool: PoolConfig, settings: &EngineSettings, window: MevWindow) -> Self {
        Self {
            pool,
            min_drop: settings.price_drop_percentage,
            max_drop: settings.max_price_drop_percentage,
            window,
            baseline: None,
            seen: 0,
        }
    }

    /// Evaluate one observation. Uses only the observation's own
    /// timestamp, so the same sequence always yields the same decision.
    pub fn evaluate(&mut self, obs: &PriceObservation) -> Option<Trigger> {
        self.seen += 1;
        self.window.observe(obs);

        let baseline = match self.baseline {
            Some(high) if high >= obs.price => high,
            _ => {
                self.baseline = Some(obs.price);
                return None;
            }
        };
        if baseline <= 0.0 {
            return None;
        }

        let drop = (baseline - obs.price) / baseline * 100.0;
        if drop < self.min_drop {
            return None;
        }

        if drop > self.max_drop {
            warn!(
                pool = %self.pool.name,
                drop = format!("{:.2}%", drop),
                max = format!("{:.2}%", self.max_drop),
                "Drop beyond maximum, ignoring"
            );
            return None;
        }

        if obs.quote_reserve < self.pool.min_sol_reserve {
            debug!(
                pool = %self.pool.name,
                reserve = format!("{:.2} SOL", obs.quote_reserve),
                min = self.pool.min_sol_reserve,
                "Drop ignored, SOL reserve below minimum"
            );
            return None;
        }

        if self.window.is_suppressed(obs.timestamp) {
            let rise = self.window.pump().map(|p| p.magnitude).unwrap_or_default();
            let peak = self.window.history().map(|o| o.price).fold(obs.price, f64::max);
            info!(
                pool = %self.pool.name,
                drop = format!("{:.2}%", drop),
                rise = format!("{:.2}%", rise),
                recent_peak = format!("{:.10}", peak),
                "Drop after pump, ignoring (possible MEV)"
            );
            return None;
        }

        info!(
            pool = %self.pool.name,
            drop = format!("{:.2}%", drop),
            price = format!("{:.10}", obs.price),
            baseline = format!("{:.10}", baseline),
            "Price drop trigger"
        );

        Some(Trigger {
            pool: self.pool.clone(),
            price: obs.price,
            baseline,
            drop_percentage: drop,
            quote_reserve: obs.quote_reserve,
            observed_at: obs.timestamp,
        })
    }

    /// Consume the stream until a trigger or until the stream ends.
    pub async fn run(mut self, mut stream: ObservationStream) -> WatcherSignal {
        while let Some(item) = stream.next().await {
            match item {
                Ok(obs) => {
                    if let Some(trigger) = self.evaluate(&obs) {
                        return WatcherSignal::Triggered {
                            trigger,
                            window: self.window,
                        };
                    }
                }
                Err(e) => return self.closed(e.to_string()),
            }
        }
        self.closed("stream ended".to_string())
    }

    /// Subscribe with backoff, then run. Exhausting the retry budget
    /// yields `Excluded`.
    pub async fn subscribe_and_run(self, feed: &dyn PriceFeed, retry: RetryPolicy) -> WatcherSignal {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let delay = retry.delay_for(attempt);
            if !delay.is_zero() {
                debug!(pool = %self.pool.name, attempt, delay_ms = delay.as_millis() as u64, "Retrying feed subscription");
                tokio::time::sleep(delay).await;
            }

            match feed.subscribe(&self.pool).await {
                Ok(stream) => {
                    debug!(pool = %self.pool.name, "Watching pool");
                    return self.run(stream).await;
                }
                Err(e) => {
                    warn!(pool = %self.pool.name, attempt, error = %e, "Feed subscription failed");
                    if !retry.allows(attempt) {
                        return WatcherSignal::Excluded {
                            pool: self.pool,
                            reason: format!("{e} (after {attempt} attempts)"),
                            window: self.window,
                        };
                    }
                }
            }
        }
    }

    fn closed(self, reason: String) -> WatcherSignal {
        debug!(pool = %self.pool.name, seen = self.seen, reason = %reason, "Watcher closed");
        WatcherSignal::Closed {
            pool: self.pool,
            reason,
            observations_seen: self.seen,
            window: self.window,
        }
    }
}

/// Start a watcher task that reports its terminal signal on `tx`. A
/// watcher that panics is reported as `Closed` with a fresh MEV window, so
/// the scheduler restarts it like any other closure.
pub fn spawn_watcher(
    pool: PoolConfig,
    window: MevWindow,
    feed: Arc<dyn PriceFeed>,
    settings: &EngineSettings,
    start_delay: Duration,
    tx: mpsc::Sender<WatcherSignal>,
) -> JoinHandle<()> {
    let retry = settings.watcher_retry;
    let spare = MevWindow::new(
        pool.address.clone(),
        settings.mev_pump_threshold,
        settings.mev_time_window,
        settings.mev_history_size,
    );
    let watcher = PoolWatcher::new(pool.clone(), settings, window);

    tokio::spawn(async move {
        if !start_delay.is_zero() {
            tokio::time::sleep(start_delay).await;
        }
        let run = AssertUnwindSafe(watcher.subscribe_and_run(feed.as_ref(), retry)).catch_unwind();
        let signal = match run.await {
            Ok(signal) => signal,
            Err(_) => {
                error!(pool = %pool.name, "Watcher panicked");
                WatcherSignal::Closed {
                    pool,
                    reason: "watcher panicked".to_string(),
                    observations_seen: 0,
                    window: spare,
                }
            }
        };
        if tx.send(signal).await.is_err() {
            debug!("Scheduler gone, dropping watcher signal");
        }
    })
}
