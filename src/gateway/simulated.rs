//! Simulated marketplace session.
//!
//! A deterministic in-memory `MarketSession` used for dry runs and tests:
//! seeded offers, real balance/space accounting, and knobs to force
//! errors or lost purchase races. All state is behind a mutex so the
//! session can be shared with test code while the driver runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

use crate::types::{CandidateOffer, HoldingLot, ListingOrder, ResourceSnapshot};

use super::{
    AuthResult, Credentials, GatewayError, ListingOutcome, MarketSession, PurchaseOutcome,
};

struct SimState {
    authenticated: bool,
    deny_auth: bool,
    cash: u64,
    bank: u64,
    inventory_used: u32,
    inventory_capacity: u32,
    storage_used: u32,
    storage_capacity: u32,
    listing_capacity: u32,
    market: Vec<CandidateOffer>,
    listings: Vec<ListingOrder>,
    /// Offers that another buyer will always win.
    lost_refs: HashSet<String>,
    call_count: u64,
}

/// In-memory marketplace with controllable state.
pub struct SimulatedSession {
    name: String,
    state: Mutex<SimState>,
    force_error: Mutex<Option<GatewayError>>,
}

impl SimulatedSession {
    /// A session with open capacity, a funded bank, and a default market.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SimState {
                authenticated: false,
                deny_auth: false,
                cash: 5_000,
                bank: 40_000,
                inventory_used: 0,
                inventory_capacity: 40,
                storage_used: 0,
                storage_capacity: 50,
                listing_capacity: 30,
                market: Self::default_market(),
                listings: Vec::new(),
                lost_refs: HashSet::new(),
                call_count: 0,
            }),
            force_error: Mutex::new(None),
        }
    }

    /// Replace the seeded market with custom offers.
    pub fn set_market(&self, offers: Vec<CandidateOffer>) {
        self.state.lock().unwrap().market = offers;
    }

    pub fn set_balances(&self, cash: u64, bank: u64) {
        let mut s = self.state.lock().unwrap();
        s.cash = cash;
        s.bank = bank;
    }

    pub fn set_capacities(&self, inventory: u32, storage: u32, listings: u32) {
        let mut s = self.state.lock().unwrap();
        s.inventory_capacity = inventory;
        s.storage_capacity = storage;
        s.listing_capacity = listings;
    }

    pub fn set_occupancy(&self, inventory_used: u32, storage_used: u32) {
        let mut s = self.state.lock().unwrap();
        s.inventory_used = inventory_used;
        s.storage_used = storage_used;
    }

    /// Reject all authentication attempts.
    pub fn deny_auth(&self, deny: bool) {
        self.state.lock().unwrap().deny_auth = deny;
    }

    /// Force all subsequent calls to return this error.
    pub fn set_error(&self, error: GatewayError) {
        *self.force_error.lock().unwrap() = Some(error);
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Mark an offer as one another buyer always wins.
    pub fn mark_lost(&self, source_ref: &str) {
        self.state
            .lock()
            .unwrap()
            .lost_refs
            .insert(source_ref.to_string());
    }

    /// Total gateway calls observed so far.
    pub fn call_count(&self) -> u64 {
        self.state.lock().unwrap().call_count
    }

    /// Listings created so far.
    pub fn listings(&self) -> Vec<ListingOrder> {
        self.state.lock().unwrap().listings.clone()
    }

    fn check_error(&self) -> Result<(), GatewayError> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(err.clone());
        }
        Ok(())
    }

    fn default_market() -> Vec<CandidateOffer> {
        let now = Utc::now();
        let offer = |kind: &str, unit_price: u64, quantity: u32, row: u32| CandidateOffer {
            item_kind: kind.to_string(),
            unit_price,
            quantity,
            total_price: unit_price * quantity as u64,
            source_ref: format!("{kind}-row-{row}"),
            discovered_at: now,
        };
        vec![
            offer("Bandage", 9, 5, 1),
            offer("Bandage", 11, 8, 2),
            offer("Bandage", 14, 4, 3), // over the default ceiling
            offer("Painkiller", 16, 3, 1),
            offer("Painkiller", 24, 6, 2), // over the default ceiling
            offer("Cooked Meat", 4, 10, 1),
            offer("Rusty Sword", 2, 1, 1), // not a configured kind
        ]
    }
}

#[async_trait]
impl MarketSession for SimulatedSession {
    async fn authenticate(&self, _creds: &Credentials) -> Result<AuthResult, GatewayError> {
        self.check_error()?;
        let mut s = self.state.lock().unwrap();
        s.call_count += 1;
        if s.deny_auth {
            return Ok(AuthResult::Denied);
        }
        s.authenticated = true;
        Ok(AuthResult::Confirmed)
    }

    async fn read_resource_snapshot(&self) -> Result<ResourceSnapshot, GatewayError> {
        self.check_error()?;
        let mut s = self.state.lock().unwrap();
        s.call_count += 1;
        if !s.authenticated {
            return Err(GatewayError::SessionExpired);
        }
        Ok(ResourceSnapshot {
            cash_on_hand: s.cash,
            bank_balance: s.bank,
            inventory_used: s.inventory_used,
            inventory_capacity: s.inventory_capacity,
            storage_used: s.storage_used,
            storage_capacity: s.storage_capacity,
            active_listings: s.listings.len() as u32,
            listing_capacity: s.listing_capacity,
            captured_at: Utc::now(),
        })
    }

    async fn scan_market(
        &self,
        item_kind: &str,
        max_rows: u32,
    ) -> Result<Vec<CandidateOffer>, GatewayError> {
        self.check_error()?;
        let mut s = self.state.lock().unwrap();
        s.call_count += 1;
        if !s.authenticated {
            return Err(GatewayError::SessionExpired);
        }
        Ok(s
            .market
            .iter()
            .filter(|o| o.item_kind == item_kind)
            .take(max_rows as usize)
            .cloned()
            .collect())
    }

    async fn attempt_purchase(
        &self,
        offer: &CandidateOffer,
    ) -> Result<PurchaseOutcome, GatewayError> {
        self.check_error()?;
        let mut s = self.state.lock().unwrap();
        s.call_count += 1;
        if !s.authenticated {
            return Err(GatewayError::SessionExpired);
        }

        // Raced away, or already gone from the board.
        if s.lost_refs.contains(&offer.source_ref) {
            return Ok(PurchaseOutcome::Lost);
        }
        let Some(pos) = s.market.iter().position(|o| o.source_ref == offer.source_ref) else {
            return Ok(PurchaseOutcome::Lost);
        };

        if s.cash < offer.total_price
            || s.inventory_used + offer.quantity > s.inventory_capacity
        {
            return Ok(PurchaseOutcome::Failed);
        }

        s.cash -= offer.total_price;
        s.inventory_used += offer.quantity;
        s.market.remove(pos);
        Ok(PurchaseOutcome::Confirmed)
    }

    async fn list_for_sale(
        &self,
        lot: &HoldingLot,
        unit_price: u64,
    ) -> Result<ListingOutcome, GatewayError> {
        self.check_error()?;
        let mut s = self.state.lock().unwrap();
        s.call_count += 1;
        if !s.authenticated {
            return Err(GatewayError::SessionExpired);
        }
        if s.listings.len() as u32 >= s.listing_capacity {
            return Err(GatewayError::ResourceRejected(
                "no free sale slots".to_string(),
            ));
        }
        if unit_price == 0 || lot.quantity > s.inventory_used {
            return Ok(ListingOutcome::Failed);
        }

        s.inventory_used -= lot.quantity;
        let order = ListingOrder {
            order_id: format!("SIM-{}", Uuid::new_v4()),
            item_kind: lot.item_kind.clone(),
            quantity: lot.quantity,
            ask_unit_price: unit_price,
            listed_at: Utc::now(),
        };
        s.listings.push(order);
        Ok(ListingOutcome::Confirmed)
    }

    async fn deposit_to_storage(&self) -> Result<bool, GatewayError> {
        self.check_error()?;
        let mut s = self.state.lock().unwrap();
        s.call_count += 1;
        if !s.authenticated {
            return Err(GatewayError::SessionExpired);
        }
        let room = s.storage_capacity.saturating_sub(s.storage_used);
        let moved = s.inventory_used.min(room);
        s.inventory_used -= moved;
        s.storage_used += moved;
        Ok(moved > 0)
    }

    async fn withdraw_all_from_bank(&self) -> Result<bool, GatewayError> {
        self.check_error()?;
        let mut s = self.state.lock().unwrap();
        s.call_count += 1;
        if !s.authenticated {
            return Err(GatewayError::SessionExpired);
        }
        if s.bank == 0 {
            return Ok(false);
        }
        s.cash += s.bank;
        s.bank = 0;
        Ok(true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
