//! Shared types for the MERCER agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that gateway, strategy,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Resource snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of every resource axis the remote marketplace
/// enforces: funds, inventory, storage, and sale-listing slots.
///
/// Replaced wholesale each decision round, never mutated in place.
/// All `used` values are expected to satisfy `used <= capacity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cash_on_hand: u64,
    pub bank_balance: u64,
    pub inventory_used: u32,
    pub inventory_capacity: u32,
    pub storage_used: u32,
    pub storage_capacity: u32,
    pub active_listings: u32,
    pub listing_capacity: u32,
    pub captured_at: DateTime<Utc>,
}

impl fmt::Display for ResourceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cash ${} | bank ${} | inv {}/{} | store {}/{} | listings {}/{}",
            self.cash_on_hand,
            self.bank_balance,
            self.inventory_used,
            self.inventory_capacity,
            self.storage_used,
            self.storage_capacity,
            self.active_listings,
            self.listing_capacity,
        )
    }
}

impl ResourceSnapshot {
    /// Total funds across wallet and bank.
    pub fn total_funds(&self) -> u64 {
        self.cash_on_hand + self.bank_balance
    }

    /// Helper to build a test snapshot with open capacity everywhere.
    #[cfg(test)]
    pub fn sample() -> Self {
        ResourceSnapshot {
            cash_on_hand: 25_000,
            bank_balance: 100_000,
            inventory_used: 4,
            inventory_capacity: 40,
            storage_used: 10,
            storage_capacity: 50,
            active_listings: 6,
            listing_capacity: 30,
            captured_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Market-side types
// ---------------------------------------------------------------------------

/// A market listing snapshot eligible for purchase evaluation.
///
/// `source_ref` is an opaque handle the gateway needs to locate the row
/// again at execution time; the core never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateOffer {
    pub item_kind: String,
    /// Price per unit, always > 0.
    pub unit_price: u64,
    /// Units in the offer, always > 0. One unit occupies one inventory slot.
    pub quantity: u32,
    pub total_price: u64,
    pub source_ref: String,
    pub discovered_at: DateTime<Utc>,
}

impl fmt::Display for CandidateOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{} @ ${} (${} total)",
            self.item_kind, self.quantity, self.unit_price, self.total_price
        )
    }
}

/// Owned, unlisted quantity of one item kind.
///
/// Created on a confirmed purchase; reduced or destroyed on a confirmed
/// sale listing or storage transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingLot {
    pub item_kind: String,
    pub quantity: u32,
    pub acquired_at: DateTime<Utc>,
    pub acquisition_unit_price: u64,
}

/// An active sale offer created by this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingOrder {
    pub order_id: String,
    pub item_kind: String,
    pub quantity: u32,
    pub ask_unit_price: u64,
    pub listed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine states
// ---------------------------------------------------------------------------

/// Phases of the trading cycle.
///
/// `Terminated` is the graceful terminal state; `ErrorFatal` is the hard
/// stop requiring operator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeState {
    Idle,
    EnsureAuthenticated,
    CheckResources,
    WithdrawFromBank,
    EnsureSpace,
    DepositToStorage,
    ScanMarket,
    Buying,
    Selling,
    WaitingNormal,
    WaitingBlocked,
    ErrorRecoverable,
    ErrorFatal,
    Terminated,
}

impl TradeState {
    /// Whether the engine halts in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeState::Terminated | TradeState::ErrorFatal)
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeState::Idle => "idle",
            TradeState::EnsureAuthenticated => "ensure_authenticated",
            TradeState::CheckResources => "check_resources",
            TradeState::WithdrawFromBank => "withdraw_from_bank",
            TradeState::EnsureSpace => "ensure_space",
            TradeState::DepositToStorage => "deposit_to_storage",
            TradeState::ScanMarket => "scan_market",
            TradeState::Buying => "buying",
            TradeState::Selling => "selling",
            TradeState::WaitingNormal => "waiting_normal",
            TradeState::WaitingBlocked => "waiting_blocked",
            TradeState::ErrorRecoverable => "error_recoverable",
            TradeState::ErrorFatal => "error_fatal",
            TradeState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Counters & status feed
// ---------------------------------------------------------------------------

/// Cumulative per-session counters, persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCounters {
    pub cycles_completed: u64,
    pub purchases_confirmed: u64,
    pub offers_lost: u64,
    pub purchases_failed: u64,
    pub listings_created: u64,
    pub bank_withdrawals: u64,
    pub storage_deposits: u64,
    pub failures_recovered: u64,
    pub started_at: DateTime<Utc>,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            cycles_completed: 0,
            purchases_confirmed: 0,
            offers_lost: 0,
            purchases_failed: 0,
            listings_created: 0,
            bank_withdrawals: 0,
            storage_deposits: 0,
            failures_recovered: 0,
            started_at: Utc::now(),
        }
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only status payload published on the driver's watch channel for
/// external logging. Never consumed by the engine itself.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: TradeState,
    pub snapshot: Option<ResourceSnapshot>,
    pub counters: SessionCounters,
}

impl EngineStatus {
    pub fn initial() -> Self {
        Self {
            state: TradeState::Idle,
            snapshot: None,
            counters: SessionCounters::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
