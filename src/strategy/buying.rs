//! Buy-side opportunity evaluation.
//!
//! Filters scanned offers against per-kind price ceilings, scores the
//! survivors by expected margin weighted by configured priority, and
//! greedily selects a purchase queue that respects inventory space, the
//! emergency cash reserve, and per-cycle caps.
//!
//! The queue is advisory: the buying phase re-validates funds and space
//! before each individual attempt, because any offer can vanish between
//! scan and execution.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::types::{CandidateOffer, ResourceSnapshot};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Per-item-kind trading parameters.
#[derive(Debug, Clone)]
pub struct ItemPolicy {
    /// Never pay more than this per unit.
    pub price_ceiling: u64,
    /// External reference for the expected resale price per unit.
    pub reference_price: u64,
    /// Lower number = higher preference.
    pub priority: u32,
}

#[derive(Debug, Clone)]
pub struct BuyPolicy {
    /// Tradeable kinds; offers of any other kind are ignored.
    pub items: HashMap<String, ItemPolicy>,
    /// Minimum expected margin (fraction of the buy price).
    pub min_margin: f64,
    pub max_purchases_per_cycle: usize,
    /// Diversification cap: offers selected per kind per cycle.
    pub per_kind_cap: usize,
    /// Cash never committed to purchases.
    pub emergency_reserve: u64,
}

impl Default for BuyPolicy {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            min_margin: 0.15,
            max_purchases_per_cycle: 10,
            per_kind_cap: 5,
            emergency_reserve: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// An offer that passed filtering, with its evaluation attached.
#[derive(Debug, Clone)]
pub struct ScoredOffer {
    pub offer: CandidateOffer,
    /// Expected margin as a fraction of the buy price.
    pub margin: f64,
    /// Margin weighted by kind priority; higher = buy first.
    pub score: f64,
}

pub struct BuyPlanner {
    policy: BuyPolicy,
}

impl BuyPlanner {
    pub fn new(policy: BuyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BuyPolicy {
        &self.policy
    }

    /// Build the ordered purchase queue for one cycle.
    ///
    /// Ordering: score descending, ties broken by lower unit price, then
    /// earlier discovery. Selection respects free inventory slots, the
    /// emergency reserve, the per-kind cap, and the per-cycle cap.
    pub fn plan(&self, offers: &[CandidateOffer], snapshot: &ResourceSnapshot) -> Vec<ScoredOffer> {
        let mut scored: Vec<ScoredOffer> = offers
            .iter()
            .filter_map(|o| self.evaluate(o))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.offer.unit_price.cmp(&b.offer.unit_price))
                .then_with(|| a.offer.discovered_at.cmp(&b.offer.discovered_at))
        });

        let mut budget = snapshot
            .cash_on_hand
            .saturating_sub(self.policy.emergency_reserve);
        let mut free_slots = snapshot.free_inventory_slots();
        let mut per_kind: HashMap<String, usize> = HashMap::new();
        let mut selected = Vec::new();

        for candidate in scored {
            if selected.len() >= self.policy.max_purchases_per_cycle {
                break;
            }
            if candidate.offer.total_price > budget {
                debug!(offer = %candidate.offer, budget, "Skipped: over remaining budget");
                continue;
            }
            if candidate.offer.quantity > free_slots {
                debug!(offer = %candidate.offer, free_slots, "Skipped: not enough inventory slots");
                continue;
            }
            let kind_count = per_kind.entry(candidate.offer.item_kind.clone()).or_insert(0);
            if *kind_count >= self.policy.per_kind_cap {
                debug!(
                    kind = %candidate.offer.item_kind,
                    cap = self.policy.per_kind_cap,
                    "Skipped: per-kind cap reached"
                );
                continue;
            }

            budget -= candidate.offer.total_price;
            free_slots -= candidate.offer.quantity;
            *kind_count += 1;
            selected.push(candidate);
        }

        info!(
            offers_in = offers.len(),
            selected = selected.len(),
            budget_left = budget,
            slots_left = free_slots,
            "Purchase queue planned"
        );

        selected
    }

    /// Score a single offer, or filter it out.
    fn evaluate(&self, offer: &CandidateOffer) -> Option<ScoredOffer> {
        if offer.unit_price == 0 || offer.quantity == 0 {
            return None;
        }

        let item = self.policy.items.get(&offer.item_kind)?;

        if offer.unit_price > item.price_ceiling {
            return None;
        }

        let margin = (item.reference_price as f64 - offer.unit_price as f64)
            / offer.unit_price as f64;
        if margin < self.policy.min_margin {
            return None;
        }

        let score = margin * 100.0 * priority_weight(item.priority);

        Some(ScoredOffer {
            offer: offer.clone(),
            margin,
            score,
        })
    }
}

/// Weight for a kind priority: 1 → 1.9, 2 → 1.8, …, 10+ → 1.0.
fn priority_weight(priority: u32) -> f64 {
    2.0 - (priority.clamp(1, 10) as f64 * 0.1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use crate::types::ResourceSnapshot;

    fn make_offer(kind: &str, unit_price: u64, quantity: u32) -> CandidateOffer {
        CandidateOffer {
            item_kind: kind.to_string(),
            unit_price,
            quantity,
            total_price: unit_price * quantity as u64,
            source_ref: format!("{kind}-{unit_price}"),
            discovered_at: Utc::now(),
        }
    }

    fn make_snapshot(cash: u64, free_slots: u32) -> ResourceSnapshot {
        ResourceSnapshot {
            cash_on_hand: cash,
            bank_balance: 0,
            inventory_used: 0,
            inventory_capacity: free_slots,
            storage_used: 0,
            storage_capacity: 50,
            active_listings: 0,
            listing_capacity: 30,
            captured_at: Utc::now(),
        }
    }

    fn make_planner() -> BuyPlanner {
        let mut items = HashMap::new();
        items.insert(
            "Bandage".to_string(),
            ItemPolicy {
                price_ceiling: 12,
                reference_price: 18,
                priority: 1,
            },
        );
        items.insert(
            "Painkiller".to_string(),
            ItemPolicy {
                price_ceiling: 20,
                reference_price: 28,
                priority: 2,
            },
        );
        BuyPlanner::new(BuyPolicy {
            items,
            emergency_reserve: 100,
            ..BuyPolicy::default()
        })
    }

    #[test]
    fn test_never_selects_above_ceiling() {
        let planner = make_planner();
        let snap = make_snapshot(100_000, 40);
        let offers = vec![
            make_offer("Bandage", 10, 5),
            make_offer("Bandage", 13, 5), // over the 12 ceiling
            make_offer("Painkiller", 21, 5), // over the 20 ceiling
        ];
        let plan = planner.plan(&offers, &snap);
        assert_eq!(plan.len(), 1);
        for s in &plan {
            let ceiling = planner.policy().items[&s.offer.item_kind].price_ceiling;
            assert!(s.offer.unit_price <= ceiling);
        }
    }

    #[test]
    fn test_total_quantity_never_exceeds_free_slots() {
        let planner = make_planner();
        let snap = make_snapshot(100_000, 12);
        let offers = vec![
            make_offer("Bandage", 10, 8),
            make_offer("Bandage", 10, 8),
            make_offer("Painkiller", 15, 8),
        ];
        let plan = planner.plan(&offers, &snap);
        let total: u32 = plan.iter().map(|s| s.offer.quantity).sum();
        assert!(total <= snap.free_inventory_slots(), "{total} slots selected");
    }

    #[test]
    fn test_respects_emergency_reserve() {
        let planner = make_planner(); // reserve = 100
        let snap = make_snapshot(150, 40);
        // 5 * 10 = $50 fits the $50 budget; a second one doesn't.
        let offers = vec![make_offer("Bandage", 10, 5), make_offer("Bandage", 10, 5)];
        let plan = planner.plan(&offers, &snap);
        let committed: u64 = plan.iter().map(|s| s.offer.total_price).sum();
        assert!(committed <= snap.cash_on_hand - 100);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_sorted_by_score_then_price_then_age() {
        let planner = make_planner();
        let snap = make_snapshot(100_000, 40);

        let early = Utc::now() - Duration::seconds(30);
        // Bandage at $9 → margin 1.0; at $10 → 0.8; Painkiller at $18 → ~0.56.
        let mut cheap_late = make_offer("Bandage", 9, 2);
        let mut cheap_early = make_offer("Bandage", 9, 2);
        cheap_early.source_ref = "earlier-row".into();
        cheap_early.discovered_at = early;
        cheap_late.discovered_at = Utc::now();

        let offers = vec![
            make_offer("Painkiller", 18, 2),
            make_offer("Bandage", 10, 2),
            cheap_late.clone(),
            cheap_early.clone(),
        ];
        let plan = planner.plan(&offers, &snap);
        assert_eq!(plan.len(), 4);
        // Highest margin first; equal offers tie-broken by discovery time.
        assert_eq!(plan[0].offer.source_ref, "earlier-row");
        assert_eq!(plan[1].offer.unit_price, 9);
        assert_eq!(plan[2].offer.unit_price, 10);
        assert_eq!(plan[3].offer.item_kind, "Painkiller");
    }

    #[test]
    fn test_priority_weights_scores() {
        let planner = make_planner();
        let snap = make_snapshot(100_000, 40);
        // Identical 100% margin on both kinds; Bandage has priority 1 vs 2.
        let offers = vec![make_offer("Bandage", 9, 1), make_offer("Painkiller", 14, 1)];
        let plan = planner.plan(&offers, &snap);
        assert_eq!(plan.len(), 2);
        assert!(plan[0].score > plan[1].score);
        assert_eq!(plan[0].offer.item_kind, "Bandage");
    }

    #[test]
    fn test_per_kind_cap() {
        let mut planner = make_planner();
        planner.policy.per_kind_cap = 2;
        let snap = make_snapshot(100_000, 40);
        let offers: Vec<_> = (0..5).map(|_| make_offer("Bandage", 10, 1)).collect();
        let plan = planner.plan(&offers, &snap);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_max_purchases_per_cycle() {
        let mut planner = make_planner();
        planner.policy.max_purchases_per_cycle = 3;
        planner.policy.per_kind_cap = 10;
        let snap = make_snapshot(100_000, 40);
        let offers: Vec<_> = (0..8).map(|_| make_offer("Bandage", 10, 1)).collect();
        let plan = planner.plan(&offers, &snap);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_thin_margin_filtered() {
        let mut planner = make_planner();
        planner.policy.min_margin = 0.50;
        let snap = make_snapshot(100_000, 40);
        // Painkiller at $20 against a $28 reference: 40% < the 50% minimum.
        let offers = vec![make_offer("Painkiller", 20, 1)];
        assert!(planner.plan(&offers, &snap).is_empty());
        // Bandage at $12 against $18 is exactly 50%; allowed.
        let offers2 = vec![make_offer("Bandage", 12, 1)];
        assert_eq!(planner.plan(&offers2, &snap).len(), 1);
    }

    #[test]
    fn test_unknown_kind_ignored() {
        let planner = make_planner();
        let snap = make_snapshot(100_000, 40);
        let offers = vec![make_offer("Rusty Sword", 1, 1)];
        assert!(planner.plan(&offers, &snap).is_empty());
    }

    #[test]
    fn test_degenerate_offers_ignored() {
        let planner = make_planner();
        let snap = make_snapshot(100_000, 40);
        let offers = vec![make_offer("Bandage", 0, 5), make_offer("Bandage", 10, 0)];
        assert!(planner.plan(&offers, &snap).is_empty());
    }

    #[test]
    fn test_cheaper_offer_fills_leftover_budget() {
        let planner = make_planner(); // reserve 100
        let snap = make_snapshot(200, 40);
        // Budget $100: the $90 offer leaves $10, which skips the $60
        // offer but still admits the $10 one ranked after it.
        let offers = vec![
            make_offer("Bandage", 9, 10), // $90, margin 1.0
            make_offer("Bandage", 10, 6), // $60, margin 0.8
            make_offer("Bandage", 10, 1), // $10, margin 0.8
        ];
        let plan = planner.plan(&offers, &snap);
        let committed: u64 = plan.iter().map(|s| s.offer.total_price).sum();
        assert_eq!(plan.len(), 2);
        assert_eq!(committed, 100);
    }
}
