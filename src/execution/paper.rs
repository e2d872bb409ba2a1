//! Paper execution for dry runs.
//!
//! Fills every swap at the request's reference price, enforces the
//! slippage bound, and keeps receipts so repeated request ids are not
//! filled twice.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::ExecutionGateway;
use crate::types::{Direction, SwapOutcome, SwapRequest, LAMPORTS_PER_SOL};

/// SOL has 9 decimals.
const SOL_DECIMALS: u32 = 9;

#[derive(Debug, Default)]
pub struct PaperGateway {
    receipts: Mutex<HashMap<Uuid, SwapOutcome>>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of swaps filled so far.
    pub fn fills(&self) -> usize {
        self.receipts
            .lock()
            .map(|r| r.values().filter(|o| matches!(o, SwapOutcome::Confirmed { .. })).count())
            .unwrap_or(0)
    }

    fn fill(request: &SwapRequest) -> SwapOutcome {
        let Some(price) = Decimal::from_f64(request.reference_price).filter(|p| *p > Decimal::ZERO) else {
            return SwapOutcome::Failed {
                reason: format!("invalid reference price {}", request.reference_price),
            };
        };

        let filled = match request.direction {
            Direction::Buy => (request.amount_in / price).round_dp(request.pool.base_decimals as u32),
            Direction::Sell => (request.amount_in * price).round_dp(SOL_DECIMALS),
        };

        if filled < request.min_amount_out {
            return SwapOutcome::Failed {
                reason: format!("slippage: out {filled} below minimum {}", request.min_amount_out),
            };
        }

        let fees = request.fees.priority_fee_lamports() + request.fees.compute_price_lamports();
        info!(
            direction = %request.direction,
            pool = %request.pool.name,
            amount_in = %request.amount_in,
            filled = %filled,
            fee_sol = format!("{:.6}", fees as f64 / LAMPORTS_PER_SOL as f64),
            "[DRY RUN] Swap filled"
        );

        SwapOutcome::Confirmed {
            tx_id: format!("paper-{}", request.request_id.simple()),
            filled_amount: filled,
        }
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit_swap(&self, request: &SwapRequest) -> Result<SwapOutcome> {
        let mut receipts = self
            .receipts
            .lock()
            .map_err(|_| anyhow::anyhow!("paper receipts lock poisoned"))?;

        if let Some(existing) = receipts.get(&request.request_id) {
            return Ok(existing.clone());
        }

        let outcome = Self::fill(request);
        receipts.insert(request.request_id, outcome.clone());
        Ok(outcome)
    }

    async fn check_status(&self, request_id: Uuid) -> Result<SwapOutcome> {
        let receipts = self
            .receipts
            .lock()
            .map_err(|_| anyhow::anyhow!("paper receipts lock poisoned"))?;

        Ok(receipts.get(&request_id).cloned().unwrap_or(SwapOutcome::Failed {
            reason: "request never submitted".to_string(),
        }))
    }
}
