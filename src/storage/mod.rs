//! Persistence layer.
//!
//! Saves and loads bot state (trade counters, daily P&L, held positions)
//! to/from a JSON file so stats survive a restart.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::engine::accountant::BotState;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "dipbot_state.json";

/// Save bot state to a JSON file.
pub fn save_state(state: &BotState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialise bot state")?;

    // Write-then-rename so a crash mid-write never leaves a truncated file.
    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json).context(format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path).context(format!("Failed to move state into {path}"))?;

    debug!(
        path,
        trades = state.trades_completed + state.trades_failed,
        pnl = %state.total_pnl_sol,
        "State saved"
    );
    Ok(())
}

/// Load bot state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<BotState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;

    let state: BotState =
        serde_json::from_str(&json).context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        completed = state.trades_completed,
        failed = state.trades_failed,
        pnl = format!("{:.6} SOL", state.total_pnl_sol),
        held = state.held_positions.len(),
        "State loaded from disk"
    );
    if !state.held_positions.is_empty() {
        warn!(
            count = state.held_positions.len(),
            "Saved state lists positions that need manual handling"
        );
    }

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
