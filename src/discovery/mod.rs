//! Pool discovery.
//!
//! Defines the `PoolDiscovery` trait, called once at startup, with a
//! static (config-file) implementation and a Raydium API implementation.

pub mod raydium;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::types::{DipError, PoolConfig};

/// Abstraction over sources of monitored pools.
#[async_trait]
pub trait PoolDiscovery: Send + Sync {
    /// List every pool to monitor, SOL oriented as the quote side.
    async fn list_configured_pools(&self) -> Result<Vec<PoolConfig>>;
}

/// Pools described in full by the configuration file.
pub struct StaticDiscovery {
    pools: Vec<PoolConfig>,
}

impl StaticDiscovery {
    pub fn new(pools: Vec<PoolConfig>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl PoolDiscovery for StaticDiscovery {
    async fn list_configured_pools(&self) -> Result<Vec<PoolConfig>> {
        if self.pools.is_empty() {
            return Err(DipError::Discovery("no static pools configured".to_string()).into());
        }
        info!(count = self.pools.len(), "Static pools loaded");
        Ok(self.pools.clone())
    }
}
