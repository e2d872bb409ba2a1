//! Price feeds.
//!
//! Defines the `PriceFeed` trait and the replay implementation used in
//! paper mode. A live Geyser/gRPC transport would plug in here.

pub mod replay;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::{FeedError, PoolConfig, PriceObservation};

/// Lazy, non-restartable stream of observations for one pool.
///
/// The stream ends (or yields a `FeedError::StreamClosed` item) when the
/// transport is lost; callers resubscribe.
pub type ObservationStream = BoxStream<'static, Result<PriceObservation, FeedError>>;

/// Abstraction over per-pool price sources.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Open a new subscription for `pool`.
    /// Returns `FeedError::Unavailable` when the source cannot be reached.
    async fn subscribe(&self, pool: &PoolConfig) -> Result<ObservationStream, FeedError>;
}
