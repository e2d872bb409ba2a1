//! In-memory collaborators for integration testing.
//!
//! A feed that plays scripted price lists per subscription, a gateway that
//! records how many swaps were ever in flight at once, and a notifier that
//! keeps every event.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use dipbot::execution::ExecutionGateway;
use dipbot::feed::{ObservationStream, PriceFeed};
use dipbot::notify::{BotEvent, Notifier};
use dipbot::types::{Direction, FeedError, PoolConfig, PriceObservation, SwapOutcome, SwapRequest};

pub fn pool(address: &str) -> PoolConfig {
    PoolConfig {
        address: address.to_string(),
        name: format!("{address}/WSOL"),
        token_mint: format!("{address}-mint"),
        base_vault: format!("{address}-base"),
        quote_vault: format!("{address}-quote"),
        base_decimals: 6,
        quote_decimals: 9,
        min_sol_reserve: 10.0,
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Each subscription to a pool takes the next scripted price list. Once a
/// pool's scripts run out it gets the repeating list, or a stream that
/// never yields.
#[derive(Default)]
pub struct ScriptedFeed {
    scripts: Mutex<HashMap<String, VecDeque<Vec<f64>>>>,
    repeat: Option<Vec<f64>>,
    subscriptions: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repeating(prices: Vec<f64>) -> Self {
        Self {
            repeat: Some(prices),
            ..Self::default()
        }
    }

    pub fn script(self, address: &str, subscriptions: Vec<Vec<f64>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(address.to_string(), subscriptions.into());
        self
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn subscribe(&self, pool: &PoolConfig) -> Result<ObservationStream, FeedError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&pool.address)
            .and_then(|s| s.pop_front())
            .or_else(|| self.repeat.clone());

        let Some(prices) = next else {
            return Ok(stream::pending().boxed());
        };

        let observations: Vec<_> = prices
            .into_iter()
            .map(|p| Ok::<_, FeedError>(PriceObservation::from_reserves(Utc::now(), 1_000_000.0, 1_000_000.0 * p).unwrap()))
            .collect();
        Ok(stream::iter(observations).boxed())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Fills at the reference price after a fixed latency.
#[derive(Default)]
pub struct CountingGateway {
    latency: Duration,
    hang_sells: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    submitted: AtomicUsize,
}

impl CountingGateway {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Sell submissions never return.
    pub fn hanging_sells(mut self) -> Self {
        self.hang_sells = true;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionGateway for CountingGateway {
    async fn submit_swap(&self, request: &SwapRequest) -> Result<SwapOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;

        if self.hang_sells && request.direction == Direction::Sell {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let price = Decimal::from_f64(request.reference_price).unwrap();
        let filled_amount = match request.direction {
            Direction::Buy => (request.amount_in / price).round_dp(6),
            Direction::Sell => (request.amount_in * price).round_dp(9),
        };
        Ok(SwapOutcome::Confirmed {
            tx_id: format!("tx-{n}"),
            filled_amount,
        })
    }

    async fn check_status(&self, _request_id: Uuid) -> Result<SwapOutcome> {
        Ok(SwapOutcome::Failed {
            reason: "unknown request".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<BotEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<BotEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&BotEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: BotEvent) {
        self.events.lock().unwrap().push(event);
    }
}
