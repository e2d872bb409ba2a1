//! Swap execution.
//!
//! Defines the `ExecutionGateway` trait. The gateway signs and submits
//! swaps; the engine only sees requests and outcomes. The paper gateway
//! fills locally for dry runs.

pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{SwapOutcome, SwapRequest};

/// Abstraction over swap execution backends.
///
/// Transport errors (`Err`) are treated by the caller like
/// `SwapOutcome::Failed`. A gateway must treat `request_id` as an
/// idempotency key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Submit a buy or sell.
    async fn submit_swap(&self, request: &SwapRequest) -> Result<SwapOutcome>;

    /// Resolve a submission that previously came back `Unknown`.
    async fn check_status(&self, request_id: Uuid) -> Result<SwapOutcome>;
}
