//! MEV pump-then-dump protection.
//!
//! A sudden rise between two consecutive observations is treated as a
//! possible sandwich/pump. For `window` after such a pump, drops on that
//! pool are ignored. Everything runs off observation timestamps, so there
//! is no timer and a replayed sequence always reaches the same decision.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

use crate::engine::EngineSettings;
use crate::types::PriceObservation;

/// A detected pump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpRecord {
    pub detected_at: DateTime<Utc>,
    /// Percentage rise that tripped the detector.
    pub magnitude: f64,
}

impl PumpRecord {
    fn expires_at(&self, window: Duration) -> DateTime<Utc> {
        self.detected_at
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// ---------------------------------------------------------------------------
// Per-pool window
// ---------------------------------------------------------------------------

/// Per-pool MEV state. Outlives individual watchers.
#[derive(Debug, Clone)]
pub struct MevWindow {
    pool: String,
    pump_threshold: f64,
    window: Duration,
    capacity: usize,
    previous_price: Option<f64>,
    pump: Option<PumpRecord>,
    history: VecDeque<PriceObservation>,
}

impl MevWindow {
    pub fn new(pool: impl Into<String>, pump_threshold: f64, window: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pool: pool.into(),
            pump_threshold,
            window,
            capacity,
            previous_price: None,
            pump: None,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Feed one observation. Returns the pump record if this observation
    /// detected a new pump.
    pub fn observe(&mut self, obs: &PriceObservation) -> Option<PumpRecord> {
        if let Some(pump) = self.pump {
            if obs.timestamp > pump.expires_at(self.window) {
                self.pump = None;
                info!(pool = %self.pool, "MEV protection window ended");
            }
        }

        let mut detected = None;
        if let Some(prev) = self.previous_price {
            if prev > 0.0 {
                let change = (obs.price - prev) / prev * 100.0;
                if change >= self.pump_threshold {
                    let record = PumpRecord {
                        detected_at: obs.timestamp,
                        magnitude: change,
                    };
                    self.pump = Some(record);
                    detected = Some(record);
                    warn!(
                        pool = %self.pool,
                        rise = format!("{:.2}%", change),
                        window_secs = self.window.num_seconds(),
                        "Sudden rise detected (possible MEV pump)"
                    );
                }
            }
        }
        self.previous_price = Some(obs.price);

        self.history.push_back(*obs);
        if let Some(cutoff) = obs.timestamp.checked_sub_signed(self.window) {
            while self
                .history
                .front()
                .is_some_and(|o| o.timestamp < cutoff)
            {
                self.history.pop_front();
            }
        }
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        detected
    }

    /// True iff a pump was recorded and `now` falls in
    /// `[detected_at, detected_at + window]`.
    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        match self.pump {
            Some(pump) => pump.detected_at <= now && now <= pump.expires_at(self.window),
            None => false,
        }
    }

    pub fn pump(&self) -> Option<PumpRecord> {
        self.pump
    }

    /// Recent observations inside the window, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PriceObservation> {
        self.history.iter()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Pool-keyed store of MEV windows. Windows are checked out by a watcher
/// for its lifetime and returned in its terminal signal.
#[derive(Debug)]
pub struct MevGuard {
    pump_threshold: f64,
    window: Duration,
    capacity: usize,
    windows: HashMap<String, MevWindow>,
}

impl MevGuard {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            pump_threshold: settings.mev_pump_threshold,
            window: settings.mev_time_window,
            capacity: settings.mev_history_size,
            windows: HashMap::new(),
        }
    }

    /// Take the pool's window, creating it on first use.
    pub fn checkout(&mut self, pool: &str) -> MevWindow {
        match self.windows.remove(pool) {
            Some(window) => window,
            None => {
                debug!(pool, "Creating MEV window");
                MevWindow::new(pool, self.pump_threshold, self.window, self.capacity)
            }
        }
    }

    pub fn checkin(&mut self, pool: &str, window: MevWindow) {
        self.windows.insert(pool.to_string(), window);
    }
}
