//! Resource coordination predicates.
//!
//! Pure, side-effect-free decision helpers over a [`ResourceSnapshot`].
//! Every transition decision the state machine takes about funds or space
//! goes through these, so the whole resource policy is testable against
//! synthetic snapshots without a session.

use crate::types::ResourceSnapshot;

impl ResourceSnapshot {
    /// Inventory slots still open, clamped at zero.
    pub fn free_inventory_slots(&self) -> u32 {
        self.inventory_capacity.saturating_sub(self.inventory_used)
    }

    /// Storage slots still open, clamped at zero.
    pub fn free_storage_slots(&self) -> u32 {
        self.storage_capacity.saturating_sub(self.storage_used)
    }

    /// Sale-listing slots still open, clamped at zero.
    pub fn free_listing_slots(&self) -> u32 {
        self.listing_capacity.saturating_sub(self.active_listings)
    }

    /// Whether the wallet has dropped below the operating floor while the
    /// bank still holds anything worth withdrawing.
    pub fn needs_bank_withdrawal(&self, fund_floor: u64) -> bool {
        self.cash_on_hand < fund_floor && self.bank_balance > 0
    }

    /// Whether the inventory is saturated but storage can still absorb it.
    pub fn needs_storage_deposit(&self) -> bool {
        self.inventory_used >= self.inventory_capacity
            && self.storage_used < self.storage_capacity
    }

    /// Full-block condition: every resource axis is exhausted at once.
    ///
    /// No forward progress is possible until an external event (a listing
    /// sells) occurs, so the engine polls at the long interval.
    pub fn is_blocked(&self) -> bool {
        self.cash_on_hand == 0
            && self.bank_balance == 0
            && self.inventory_used >= self.inventory_capacity
            && self.storage_used >= self.storage_capacity
            && self.active_listings >= self.listing_capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
