//! Replay feed.
//!
//! Plays back recorded raw vault balances per pool at a fixed pace. Each
//! pool has one shared cursor, so a resubscription continues where the
//! previous stream stopped. Once a pool's ticks run out, its stream ends
//! and further subscriptions report the feed as unavailable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{ObservationStream, PriceFeed};
use crate::types::{FeedError, PoolConfig, PriceObservation};

/// One recorded pair of raw vault balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReplayTick {
    pub base_amount: u64,
    pub quote_amount: u64,
}

/// On-disk layout: ticks keyed by pool address.
#[derive(Debug, Deserialize)]
struct ReplayFile {
    pools: HashMap<String, Vec<ReplayTick>>,
}

struct Track {
    ticks: Arc<Vec<ReplayTick>>,
    position: Arc<AtomicUsize>,
}

pub struct ReplayFeed {
    tracks: HashMap<String, Track>,
    interval: Duration,
}

impl ReplayFeed {
    pub fn new(pools: HashMap<String, Vec<ReplayTick>>, interval: Duration) -> Self {
        let tracks = pools
            .into_iter()
            .map(|(address, ticks)| {
                let track = Track {
                    ticks: Arc::new(ticks),
                    position: Arc::new(AtomicUsize::new(0)),
                };
                (address, track)
            })
            .collect();
        Self { tracks, interval }
    }

    /// Load recorded ticks from a JSON file.
    pub fn load(path: &str, interval: Duration) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {path}"))?;
        let file: ReplayFile = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse replay file {path}"))?;

        let total: usize = file.pools.values().map(Vec::len).sum();
        info!(path, pools = file.pools.len(), ticks = total, "Replay feed loaded");

        Ok(Self::new(file.pools, interval))
    }

    /// Ticks not yet played for `address`.
    pub fn remaining(&self, address: &str) -> usize {
        self.tracks
            .get(address)
            .map(|t| t.ticks.len().saturating_sub(t.position.load(Ordering::SeqCst)))
            .unwrap_or(0)
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn subscribe(&self, pool: &PoolConfig) -> Result<ObservationStream, FeedError> {
        let track = self.tracks.get(&pool.address).ok_or_else(|| FeedError::Unavailable {
            pool: pool.name.clone(),
            message: "no recorded ticks for this pool".to_string(),
        })?;

        if track.position.load(Ordering::SeqCst) >= track.ticks.len() {
            return Err(FeedError::Unavailable {
                pool: pool.name.clone(),
                message: "replay exhausted".to_string(),
            });
        }

        debug!(pool = %pool.name, remaining = self.remaining(&pool.address), "Replay subscription opened");

        let state = (
            pool.clone(),
            Arc::clone(&track.ticks),
            Arc::clone(&track.position),
            self.interval,
        );

        let stream = stream::unfold(state, |(pool, ticks, position, interval)| async move {
            loop {
                tokio::time::sleep(interval).await;
                let idx = position.fetch_add(1, Ordering::SeqCst);
                let tick = *ticks.get(idx)?;
                match PriceObservation::from_raw_reserves(&pool, Utc::now(), tick.base_amount, tick.quote_amount) {
                    Some(obs) => return Some((Ok::<_, FeedError>(obs), (pool, ticks, position, interval))),
                    None => debug!(pool = %pool.name, idx, "Skipping tick with empty base vault"),
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(pairs: &[(u64, u64)]) -> Vec<ReplayTick> {
        pairs
            .iter()
            .map(|&(base_amount, quote_amount)| ReplayTick { base_amount, quote_amount })
            .collect()
    }

    fn feed(pool: &PoolConfig, pairs: &[(u64, u64)]) -> ReplayFeed {
        let mut pools = HashMap::new();
        pools.insert(pool.address.clone(), ticks(pairs));
        ReplayFeed::new(pools, Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_scales_by_decimals() {
        let pool = PoolConfig::sample("BONK"); // base 6, quote 9
        let feed = feed(&pool, &[(2_000_000, 1_000_000_000), (4_000_000, 1_000_000_000)]);

        let observations: Vec<_> = feed.subscribe(&pool).await.unwrap().collect().await;
        assert_eq!(observations.len(), 2);
        let first = observations[0].as_ref().unwrap();
        assert!((first.price - 0.5).abs() < 1e-12);
        assert!((first.quote_reserve - 1.0).abs() < 1e-12);
        let second = observations[1].as_ref().unwrap();
        assert!((second.price - 0.25).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_continues_from_cursor() {
        let pool = PoolConfig::sample("WIF");
        let feed = feed(&pool, &[(1_000_000, 1_000_000_000), (1_000_000, 2_000_000_000), (1_000_000, 3_000_000_000)]);

        let mut stream = feed.subscribe(&pool).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!((first.price - 1.0).abs() < 1e-12);
        drop(stream);

        let rest: Vec<_> = feed.subscribe(&pool).await.unwrap().collect().await;
        assert_eq!(rest.len(), 2);
        assert!((rest[0].as_ref().unwrap().price - 2.0).abs() < 1e-12);
        assert_eq!(feed.remaining(&pool.address), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_replay_is_unavailable() {
        let pool = PoolConfig::sample("POPCAT");
        let feed = feed(&pool, &[(1_000_000, 1_000_000_000)]);
        let _: Vec<_> = feed.subscribe(&pool).await.unwrap().collect().await;

        let err = feed.subscribe(&pool).await.err().unwrap();
        assert!(matches!(err, FeedError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_unknown_pool_is_unavailable() {
        let known = PoolConfig::sample("BONK");
        let feed = feed(&known, &[(1, 1)]);
        let other = PoolConfig::sample("OTHER");
        assert!(feed.subscribe(&other).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_base_ticks_skipped() {
        let pool = PoolConfig::sample("BONK");
        let feed = feed(&pool, &[(0, 1_000_000_000), (1_000_000, 1_000_000_000)]);
        let observations: Vec<_> = feed.subscribe(&pool).await.unwrap().collect().await;
        assert_eq!(observations.len(), 1);
    }

    #[test]
    fn test_parse_replay_file() {
        let json = r#"{"pools": {"POOL1": [{"base_amount": 10, "quote_amount": 20}]}}"#;
        let file: ReplayFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.pools["POOL1"][0], ReplayTick { base_amount: 10, quote_amount: 20 });
    }
}
