//! Opportunity evaluation: buy-side ranking and sell-side pricing.

pub mod buying;
pub mod selling;

pub use buying::{BuyPlanner, BuyPolicy, ItemPolicy, ScoredOffer};
pub use selling::{PlannedListing, SellPlanner, SellPolicy};
