//! Persistence layer.
//!
//! Saves and loads session state (counters, holdings, live listings) to
//! a JSON file so a restarted engine resumes its tallies instead of
//! starting from zero. Resource truth is never persisted; the remote
//! session is re-read on every startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::types::{HoldingLot, ListingOrder, SessionCounters};

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "mercer_state.json";

/// Everything worth carrying across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub counters: SessionCounters,
    pub holdings: Vec<HoldingLot>,
    pub listings: Vec<ListingOrder>,
}

/// Save session state to a JSON file.
pub fn save_session(state: &PersistedSession, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state)
        .context("Failed to serialise session state")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write session state to {path}"))?;

    debug!(path, cycles = state.counters.cycles_completed, "Session state saved");
    Ok(())
}

/// Load session state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_session(path: Option<&str>) -> Result<Option<PersistedSession>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved session found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read session state from {path}"))?;

    let state: PersistedSession = serde_json::from_str(&json)
        .context(format!("Failed to parse session state from {path}"))?;

    info!(
        path,
        cycles = state.counters.cycles_completed,
        purchases = state.counters.purchases_confirmed,
        holdings = state.holdings.len(),
        "Session state loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_session(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
