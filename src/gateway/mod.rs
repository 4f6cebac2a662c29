//! Remote-session gateway.
//!
//! Defines the `MarketSession` trait, the only seam through which the
//! engine touches the remote marketplace, plus the raw error signals a
//! session can emit. The production gateway (browser/session automation)
//! lives outside this crate; the `simulated` module provides a
//! deterministic in-memory session for dry runs and tests.

pub mod simulated;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use crate::types::{CandidateOffer, HoldingLot, ResourceSnapshot};

// ---------------------------------------------------------------------------
// Raw failure signals
// ---------------------------------------------------------------------------

/// Raw failure emitted by a session call, before classification.
///
/// The engine never matches on these directly; it feeds them through the
/// failure classifier, which maps each variant to a recovery route.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The call did not complete within its allotted time.
    #[error("operation timed out after {0}s")]
    Timeout(u64),

    /// Transport-level problem reaching the remote session.
    #[error("network failure: {0}")]
    Network(String),

    /// The remote interface no longer matches what the gateway expected
    /// (moved control, missing row, unparsable value).
    #[error("interface drift: {0}")]
    InterfaceDrift(String),

    /// A mutating call finished without an observable confirmation; the
    /// remote side may or may not have applied it.
    #[error("ambiguous outcome for mutating call: {0}")]
    AmbiguousOutcome(String),

    /// The session is no longer authenticated.
    #[error("session not authenticated")]
    SessionExpired,

    /// The remote side refused the operation for lack of funds or space.
    #[error("resource rejected: {0}")]
    ResourceRejected(String),

    /// The remote side has flagged or locked the account.
    #[error("account locked or flagged: {0}")]
    AccountLocked(String),
}

// ---------------------------------------------------------------------------
// Call results
// ---------------------------------------------------------------------------

/// Result of an authentication attempt that completed without a raw failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// The session is confirmed logged in.
    Confirmed,
    /// Credentials were rejected.
    Denied,
}

/// Result of a purchase attempt that completed without a raw failure.
///
/// `Lost` means another buyer took the offer first, an expected outcome
/// in a shared marketplace, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Confirmed,
    Lost,
    Failed,
}

/// Result of a listing attempt that completed without a raw failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingOutcome {
    Confirmed,
    Failed,
}

/// Login credentials, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

// ---------------------------------------------------------------------------
// Session contract
// ---------------------------------------------------------------------------

/// Abstraction over the remote marketplace session.
///
/// Every method is a suspension point: the driver wraps each call in a
/// timeout and races it against the stop signal. Implementations must not
/// retry internally; retry policy belongs to the engine. No two mutating
/// calls are ever issued concurrently.
#[async_trait]
pub trait MarketSession: Send + Sync {
    /// Establish (or confirm) an authenticated session.
    async fn authenticate(&self, creds: &Credentials) -> Result<AuthResult, GatewayError>;

    /// Read a fresh view of wallet, bank, inventory, storage, and listings.
    async fn read_resource_snapshot(&self) -> Result<ResourceSnapshot, GatewayError>;

    /// Scan the market for offers of one item kind, up to `max_rows`.
    async fn scan_market(
        &self,
        item_kind: &str,
        max_rows: u32,
    ) -> Result<Vec<CandidateOffer>, GatewayError>;

    /// Attempt to buy a previously discovered offer.
    async fn attempt_purchase(
        &self,
        offer: &CandidateOffer,
    ) -> Result<PurchaseOutcome, GatewayError>;

    /// Put a holding lot up for sale at the given unit price.
    async fn list_for_sale(
        &self,
        lot: &HoldingLot,
        unit_price: u64,
    ) -> Result<ListingOutcome, GatewayError>;

    /// Move everything movable from inventory into storage.
    /// `Ok(false)` means the transfer was not confirmed.
    async fn deposit_to_storage(&self) -> Result<bool, GatewayError>;

    /// Withdraw the full bank balance into the wallet.
    /// `Ok(false)` means the withdrawal was not confirmed.
    async fn withdraw_all_from_bank(&self) -> Result<bool, GatewayError>;

    /// Session name for logging.
    fn name(&self) -> &str;
}
