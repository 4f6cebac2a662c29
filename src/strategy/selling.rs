//! Sell-side planning.
//!
//! Ranks holding lots for listing and prices each ask off its acquisition
//! cost: `ask = acquisition_price × (1 + markup)`, with the markup clamped
//! into the configured band. Oldest lots go first; once inventory
//! utilisation crosses the pressure threshold, bigger lots jump the queue
//! because they free the most slots per listing.

use tracing::{debug, info};

use crate::types::{HoldingLot, ResourceSnapshot};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SellPolicy {
    /// Target markup over the acquisition price.
    pub markup: f64,
    pub min_markup: f64,
    pub max_markup: f64,
    /// Inventory utilisation above which listing becomes urgent.
    pub inventory_pressure_threshold: f64,
}

impl Default for SellPolicy {
    fn default() -> Self {
        Self {
            markup: 0.20,
            min_markup: 0.10,
            max_markup: 0.50,
            inventory_pressure_threshold: 0.80,
        }
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// A lot queued for listing at a computed ask price.
#[derive(Debug, Clone)]
pub struct PlannedListing {
    pub lot: HoldingLot,
    pub ask_unit_price: u64,
}

pub struct SellPlanner {
    policy: SellPolicy,
}

impl SellPlanner {
    pub fn new(policy: SellPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SellPolicy {
        &self.policy
    }

    /// Ask price for one lot: acquisition price marked up by the clamped
    /// markup, rounded to whole dollars, never below cost + 1.
    pub fn ask_price(&self, lot: &HoldingLot) -> u64 {
        let markup = self
            .policy
            .markup
            .clamp(self.policy.min_markup, self.policy.max_markup);
        let ask = (lot.acquisition_unit_price as f64 * (1.0 + markup)).round() as u64;
        ask.max(lot.acquisition_unit_price + 1)
    }

    /// Plan up to `free_listing_slots` listings for this cycle.
    pub fn plan(&self, holdings: &[HoldingLot], snapshot: &ResourceSnapshot) -> Vec<PlannedListing> {
        let free_slots = snapshot.free_listing_slots() as usize;
        if free_slots == 0 || holdings.is_empty() {
            return Vec::new();
        }

        let utilisation = if snapshot.inventory_capacity > 0 {
            snapshot.inventory_used as f64 / snapshot.inventory_capacity as f64
        } else {
            0.0
        };
        let under_pressure = utilisation >= self.policy.inventory_pressure_threshold;

        let mut ranked: Vec<&HoldingLot> = holdings.iter().collect();
        if under_pressure {
            // Free the most inventory per listing slot, then oldest first.
            ranked.sort_by(|a, b| {
                b.quantity
                    .cmp(&a.quantity)
                    .then_with(|| a.acquired_at.cmp(&b.acquired_at))
            });
            debug!(
                utilisation = format!("{:.0}%", utilisation * 100.0),
                "Inventory pressure — listing large lots first"
            );
        } else {
            ranked.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at));
        }

        let planned: Vec<PlannedListing> = ranked
            .into_iter()
            .take(free_slots)
            .map(|lot| PlannedListing {
                lot: lot.clone(),
                ask_unit_price: self.ask_price(lot),
            })
            .collect();

        info!(
            holdings = holdings.len(),
            planned = planned.len(),
            free_slots,
            under_pressure,
            "Sell orders planned"
        );

        planned
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
