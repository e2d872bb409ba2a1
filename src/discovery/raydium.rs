//! Raydium v3 API pool discovery.
//!
//! Resolves each configured token mint paired with WSOL to a standard AMM
//! pool, then fetches the pool keys for the vault addresses.
//!
//! API docs: https://api-v3.raydium.io/docs/
//! Endpoints: `/pools/info/mint` (id, mints, reserves), `/pools/key/ids`
//! (vaults). Auth: none.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::PoolDiscovery;
use crate::config::TokenConfig;
use crate::types::{DipError, PoolConfig};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://api-v3.raydium.io";
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Pools returned per mint lookup; the first (largest) one is used.
const PAGE_SIZE: u32 = 2;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
struct PoolPage {
    #[serde(default)]
    data: Vec<PoolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolInfo {
    id: String,
    mint_a: MintInfo,
    mint_b: MintInfo,
    #[serde(default)]
    mint_amount_a: f64,
    #[serde(default)]
    mint_amount_b: f64,
    #[serde(default)]
    tvl: f64,
}

#[derive(Debug, Deserialize)]
struct MintInfo {
    address: String,
    #[serde(default)]
    symbol: String,
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct PoolKeys {
    id: String,
    vault: Vaults,
}

#[derive(Debug, Deserialize)]
struct Vaults {
    #[serde(rename = "A")]
    a: String,
    #[serde(rename = "B")]
    b: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RaydiumDiscovery {
    http: Client,
    tokens: Vec<TokenConfig>,
    min_sol_reserve: f64,
}

impl RaydiumDiscovery {
    pub fn new(tokens: Vec<TokenConfig>, min_sol_reserve: f64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("DIPBOT/0.1.0")
            .build()
            .context("Failed to build HTTP client for Raydium")?;

        Ok(Self {
            http,
            tokens,
            min_sol_reserve,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Fetching Raydium API");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("Raydium API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Raydium API error {status}: {body}");
        }

        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .context("Failed to parse Raydium response")?;

        if !parsed.success {
            anyhow::bail!("Raydium API reported failure for {url}");
        }
        Ok(parsed.data)
    }

    async fn pool_for_mint(&self, mint: &str) -> Result<Option<PoolInfo>> {
        let url = format!(
            "{BASE_URL}/pools/info/mint?mint1={}&mint2={WSOL_MINT}&poolType=standard\
             &poolSortField=default&sortType=desc&pageSize={PAGE_SIZE}&page=1",
            urlencoding::encode(mint),
        );
        let page: PoolPage = self.get_json(&url).await?;
        Ok(page.data.into_iter().next())
    }

    async fn keys_for_pool(&self, id: &str) -> Result<PoolKeys> {
        let url = format!("{BASE_URL}/pools/key/ids?ids={}", urlencoding::encode(id));
        let keys: Vec<Option<PoolKeys>> = self.get_json(&url).await?;
        keys.into_iter()
            .flatten()
            .find(|k| k.id == id)
            .with_context(|| format!("No pool keys returned for {id}"))
    }

    async fn resolve(&self, token: &TokenConfig) -> Result<Option<PoolConfig>> {
        let Some(info) = self.pool_for_mint(&token.out_token).await? else {
            warn!(mint = %token.out_token, "No WSOL pool found for token");
            return Ok(None);
        };
        let keys = self.keys_for_pool(&info.id).await?;
        Ok(orient(&info, &keys, token, self.min_sol_reserve))
    }
}

/// Build a SOL-quoted `PoolConfig`, or `None` if the pool is not a WSOL
/// pair or its SOL reserve is below the floor.
fn orient(info: &PoolInfo, keys: &PoolKeys, token: &TokenConfig, min_sol_reserve: f64) -> Option<PoolConfig> {
    let (token_mint, sol_mint, base_vault, quote_vault, sol_reserve) = if info.mint_a.address == WSOL_MINT {
        (&info.mint_b, &info.mint_a, &keys.vault.b, &keys.vault.a, info.mint_amount_a)
    } else if info.mint_b.address == WSOL_MINT {
        (&info.mint_a, &info.mint_b, &keys.vault.a, &keys.vault.b, info.mint_amount_b)
    } else {
        warn!(pool = %info.id, "Pool is not paired with WSOL, skipping");
        return None;
    };

    let name = token
        .token_pair
        .clone()
        .unwrap_or_else(|| format!("{}/WSOL", token_mint.symbol));

    if sol_reserve < min_sol_reserve {
        warn!(
            pool = %name,
            reserve = format!("{:.2} SOL", sol_reserve),
            min = min_sol_reserve,
            "Pool skipped: SOL reserve below minimum"
        );
        return None;
    }

    info!(
        pool = %name,
        reserve = format!("{:.2} SOL", sol_reserve),
        tvl = format!("{:.0}", info.tvl),
        "Pool found"
    );

    Some(PoolConfig {
        address: token.pair_address.clone().unwrap_or_else(|| info.id.clone()),
        name,
        token_mint: token_mint.address.clone(),
        base_vault: base_vault.clone(),
        quote_vault: quote_vault.clone(),
        base_decimals: token_mint.decimals,
        quote_decimals: sol_mint.decimals,
        min_sol_reserve,
    })
}

#[async_trait]
impl PoolDiscovery for RaydiumDiscovery {
    async fn list_configured_pools(&self) -> Result<Vec<PoolConfig>> {
        let mut pools = Vec::new();

        for token in &self.tokens {
            match self.resolve(token).await {
                Ok(Some(pool)) => pools.push(pool),
                Ok(None) => {}
                Err(e) => warn!(mint = %token.out_token, error = %e, "Could not resolve token"),
            }
        }

        if pools.is_empty() {
            return Err(DipError::Discovery("no Raydium pools resolved".to_string()).into());
        }

        info!(count = pools.len(), requested = self.tokens.len(), "Raydium pools resolved");
        Ok(pools)
    }
}
