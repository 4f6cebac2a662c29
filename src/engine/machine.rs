//! Deterministic trading state machine.
//!
//! The transition function is pure: given the current state, the latest
//! resource snapshot, and the outcome of the phase that just ran, the next
//! state is fully determined. The `StateMachine` wrapper adds transition
//! logging, dwell-time tracking, bounded authentication retries, and the
//! resume target used after recoverable failures, and no hidden inputs
//! beyond those.

use std::time::Instant;
use tracing::{info, warn};

use crate::failure::FailureKind;
use crate::types::{ResourceSnapshot, TradeState};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Outcome of the phase that just executed, fed into the transition
/// function together with the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The host asked the engine to start.
    Started,
    /// Authentication confirmed by the remote session.
    AuthConfirmed,
    /// Credentials rejected by the remote session.
    AuthDenied,
    /// A fresh resource snapshot was read.
    SnapshotRead,
    /// A bank withdrawal or storage deposit was confirmed.
    TransferApplied,
    /// The space decision was made from the current snapshot.
    SpaceChecked,
    /// Market scan finished; counts feed the next-phase decision.
    ScanCompleted {
        buy_queue: usize,
        sellable_lots: usize,
    },
    /// A buying or selling pass ran to completion. Individual attempts may
    /// have failed or lost races; both funnel back to the resource check.
    PhaseComplete,
    /// A normal or blocked waiting interval elapsed.
    WaitElapsed,
    /// The backoff delay after a recoverable failure elapsed.
    RecoveryElapsed,
    /// The remote session dropped its authentication mid-flight.
    SessionLost,
    /// A classified failure from the failure classifier.
    Failure(FailureKind),
    /// The global stop signal was asserted.
    StopRequested,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Wallet floor below which the bank is tapped.
    pub fund_floor: u64,
    /// Authentication attempts tolerated before giving up.
    pub max_auth_retries: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            fund_floor: 10_000,
            max_auth_retries: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub struct StateMachine {
    config: MachineConfig,
    current: TradeState,
    entered_at: Instant,
    auth_attempts: u32,
    /// Where execution resumes once a recoverable failure's backoff ends.
    resume_target: TradeState,
}

impl StateMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            current: TradeState::Idle,
            entered_at: Instant::now(),
            auth_attempts: 0,
            resume_target: TradeState::CheckResources,
        }
    }

    pub fn current(&self) -> TradeState {
        self.current
    }

    pub fn resume_target(&self) -> TradeState {
        self.resume_target
    }

    pub fn auth_attempts(&self) -> u32 {
        self.auth_attempts
    }

    /// Apply one phase outcome and move to the next state.
    pub fn advance(
        &mut self,
        snapshot: Option<&ResourceSnapshot>,
        outcome: &PhaseOutcome,
    ) -> TradeState {
        // Bookkeeping that feeds the transition decision.
        match outcome {
            PhaseOutcome::AuthConfirmed => self.auth_attempts = 0,
            PhaseOutcome::AuthDenied => self.auth_attempts += 1,
            PhaseOutcome::Failure(_) if self.current == TradeState::EnsureAuthenticated => {
                self.auth_attempts += 1;
            }
            _ => {}
        }

        let next = next_state(
            self.current,
            snapshot,
            outcome,
            &self.config,
            self.auth_attempts,
        );

        if next == TradeState::ErrorRecoverable {
            self.resume_target = match outcome {
                // Retry the same phase once the backoff elapses.
                PhaseOutcome::Failure(FailureKind::Transient) => self.current,
                // A denied login retries the login, not the cycle.
                PhaseOutcome::AuthDenied => TradeState::EnsureAuthenticated,
                // Anything else recoverable re-derives truth first.
                _ => TradeState::CheckResources,
            };
        }

        if next != self.current {
            let dwell = self.entered_at.elapsed();
            info!(
                from = %self.current,
                to = %next,
                dwell_secs = format!("{:.1}", dwell.as_secs_f64()),
                "State transition"
            );
            self.current = next;
            self.entered_at = Instant::now();
        }

        next
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Pure transition function over (state, snapshot, outcome).
pub fn next_state(
    current: TradeState,
    snapshot: Option<&ResourceSnapshot>,
    outcome: &PhaseOutcome,
    config: &MachineConfig,
    auth_attempts: u32,
) -> TradeState {
    if current.is_terminal() {
        return current;
    }

    // Outcomes that apply regardless of phase.
    match outcome {
        PhaseOutcome::StopRequested => return TradeState::Terminated,
        PhaseOutcome::Failure(FailureKind::Fatal) => return TradeState::ErrorFatal,
        PhaseOutcome::SessionLost => return TradeState::EnsureAuthenticated,
        PhaseOutcome::Failure(FailureKind::ResourceInsufficient) => {
            // Not an error; fold into the matching resource transition.
            return match snapshot {
                Some(s) if s.needs_bank_withdrawal(config.fund_floor) => {
                    TradeState::WithdrawFromBank
                }
                Some(s) if s.needs_storage_deposit() => TradeState::DepositToStorage,
                Some(s) if s.is_blocked() => TradeState::WaitingBlocked,
                Some(_) => TradeState::WaitingNormal,
                None => TradeState::CheckResources,
            };
        }
        PhaseOutcome::Failure(FailureKind::Transient | FailureKind::StaleState) => {
            // Authentication gets a bounded number of attempts in total.
            if current == TradeState::EnsureAuthenticated
                && auth_attempts >= config.max_auth_retries
            {
                return TradeState::ErrorFatal;
            }
            return TradeState::ErrorRecoverable;
        }
        _ => {}
    }

    match (current, outcome) {
        (TradeState::Idle, PhaseOutcome::Started) => TradeState::EnsureAuthenticated,

        (TradeState::EnsureAuthenticated, PhaseOutcome::AuthConfirmed) => {
            TradeState::CheckResources
        }
        (TradeState::EnsureAuthenticated, PhaseOutcome::AuthDenied) => {
            if auth_attempts >= config.max_auth_retries {
                TradeState::ErrorFatal
            } else {
                TradeState::ErrorRecoverable
            }
        }

        (TradeState::CheckResources, PhaseOutcome::SnapshotRead) => match snapshot {
            Some(s) if s.needs_bank_withdrawal(config.fund_floor) => TradeState::WithdrawFromBank,
            Some(_) => TradeState::EnsureSpace,
            None => {
                warn!("Snapshot missing after read — repeating resource check");
                TradeState::CheckResources
            }
        },

        (TradeState::WithdrawFromBank, PhaseOutcome::TransferApplied) => {
            TradeState::CheckResources
        }

        (TradeState::EnsureSpace, PhaseOutcome::SpaceChecked) => match snapshot {
            Some(s) if s.needs_storage_deposit() => TradeState::DepositToStorage,
            Some(s) if s.inventory_used >= s.inventory_capacity => {
                // Inventory full and storage saturated too.
                TradeState::WaitingBlocked
            }
            Some(_) => TradeState::ScanMarket,
            None => TradeState::CheckResources,
        },

        (TradeState::DepositToStorage, PhaseOutcome::TransferApplied) => {
            TradeState::CheckResources
        }

        (
            TradeState::ScanMarket,
            PhaseOutcome::ScanCompleted {
                buy_queue,
                sellable_lots,
            },
        ) => {
            if *buy_queue > 0 {
                TradeState::Buying
            } else {
                let slot_free = snapshot.map(|s| s.free_listing_slots() > 0).unwrap_or(false);
                if *sellable_lots > 0 && slot_free {
                    TradeState::Selling
                } else {
                    TradeState::WaitingNormal
                }
            }
        }

        (TradeState::Buying | TradeState::Selling, PhaseOutcome::PhaseComplete) => {
            TradeState::CheckResources
        }

        (TradeState::WaitingNormal | TradeState::WaitingBlocked, PhaseOutcome::WaitElapsed) => {
            TradeState::CheckResources
        }

        (TradeState::ErrorRecoverable, PhaseOutcome::RecoveryElapsed) => {
            // The wrapper substitutes its stored resume target; standalone
            // callers fall back to the safe default.
            TradeState::CheckResources
        }

        (state, outcome) => {
            warn!(state = %state, outcome = ?outcome, "Unexpected outcome for state — holding");
            state
        }
    }
}

impl StateMachine {
    /// Leave `ErrorRecoverable` for the stored resume target.
    pub fn resume(&mut self) -> TradeState {
        let target = if self.current == TradeState::ErrorRecoverable {
            self.resume_target
        } else {
            self.current
        };
        if target != self.current {
            info!(from = %self.current, to = %target, "Resuming after recovery");
            self.current = target;
            self.entered_at = Instant::now();
        }
        target
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_snapshot(
        cash: u64,
        bank: u64,
        inv: (u32, u32),
        store: (u32, u32),
        listings: (u32, u32),
    ) -> ResourceSnapshot {
        ResourceSnapshot {
            cash_on_hand: cash,
            bank_balance: bank,
            inventory_used: inv.0,
            inventory_capacity: inv.1,
            storage_used: store.0,
            storage_capacity: store.1,
            active_listings: listings.0,
            listing_capacity: listings.1,
            captured_at: Utc::now(),
        }
    }

    fn cfg(fund_floor: u64) -> MachineConfig {
        MachineConfig {
            fund_floor,
            max_auth_retries: 3,
        }
    }

    #[test]
    fn test_idle_starts_with_authentication() {
        let next = next_state(
            TradeState::Idle,
            None,
            &PhaseOutcome::Started,
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::EnsureAuthenticated);
    }

    #[test]
    fn test_low_cash_with_bank_goes_to_withdrawal() {
        // cash 0, bank 500, floor 100 → withdraw.
        let snap = make_snapshot(0, 500, (0, 40), (0, 50), (0, 30));
        let next = next_state(
            TradeState::CheckResources,
            Some(&snap),
            &PhaseOutcome::SnapshotRead,
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::WithdrawFromBank);
    }

    #[test]
    fn test_low_cash_empty_bank_proceeds_to_space_check() {
        let snap = make_snapshot(0, 0, (0, 40), (0, 50), (0, 30));
        let next = next_state(
            TradeState::CheckResources,
            Some(&snap),
            &PhaseOutcome::SnapshotRead,
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::EnsureSpace);
    }

    #[test]
    fn test_full_inventory_with_storage_room_deposits() {
        // inventory 40/40, storage 10/50 → deposit.
        let snap = make_snapshot(1000, 0, (40, 40), (10, 50), (0, 30));
        let next = next_state(
            TradeState::EnsureSpace,
            Some(&snap),
            &PhaseOutcome::SpaceChecked,
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::DepositToStorage);
    }

    #[test]
    fn test_full_inventory_and_storage_blocks() {
        let snap = make_snapshot(0, 0, (40, 40), (50, 50), (30, 30));
        let next = next_state(
            TradeState::EnsureSpace,
            Some(&snap),
            &PhaseOutcome::SpaceChecked,
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::WaitingBlocked);
    }

    #[test]
    fn test_open_space_scans_market() {
        let snap = make_snapshot(1000, 0, (4, 40), (10, 50), (0, 30));
        let next = next_state(
            TradeState::EnsureSpace,
            Some(&snap),
            &PhaseOutcome::SpaceChecked,
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::ScanMarket);
    }

    #[test]
    fn test_scan_routes_to_buying_selling_or_waiting() {
        let snap = make_snapshot(1000, 0, (4, 40), (10, 50), (6, 30));
        let c = cfg(100);

        let buying = next_state(
            TradeState::ScanMarket,
            Some(&snap),
            &PhaseOutcome::ScanCompleted {
                buy_queue: 2,
                sellable_lots: 0,
            },
            &c,
            0,
        );
        assert_eq!(buying, TradeState::Buying);

        let selling = next_state(
            TradeState::ScanMarket,
            Some(&snap),
            &PhaseOutcome::ScanCompleted {
                buy_queue: 0,
                sellable_lots: 3,
            },
            &c,
            0,
        );
        assert_eq!(selling, TradeState::Selling);

        let waiting = next_state(
            TradeState::ScanMarket,
            Some(&snap),
            &PhaseOutcome::ScanCompleted {
                buy_queue: 0,
                sellable_lots: 0,
            },
            &c,
            0,
        );
        assert_eq!(waiting, TradeState::WaitingNormal);
    }

    #[test]
    fn test_sellable_lots_without_free_slot_waits() {
        let snap = make_snapshot(1000, 0, (4, 40), (10, 50), (30, 30));
        let next = next_state(
            TradeState::ScanMarket,
            Some(&snap),
            &PhaseOutcome::ScanCompleted {
                buy_queue: 0,
                sellable_lots: 3,
            },
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::WaitingNormal);
    }

    #[test]
    fn test_phases_funnel_back_to_resource_check() {
        let c = cfg(100);
        for state in [
            TradeState::Buying,
            TradeState::Selling,
        ] {
            let next = next_state(state, None, &PhaseOutcome::PhaseComplete, &c, 0);
            assert_eq!(next, TradeState::CheckResources);
        }
        for state in [TradeState::WithdrawFromBank, TradeState::DepositToStorage] {
            let next = next_state(state, None, &PhaseOutcome::TransferApplied, &c, 0);
            assert_eq!(next, TradeState::CheckResources);
        }
        for state in [TradeState::WaitingNormal, TradeState::WaitingBlocked] {
            let next = next_state(state, None, &PhaseOutcome::WaitElapsed, &c, 0);
            assert_eq!(next, TradeState::CheckResources);
        }
    }

    #[test]
    fn test_stop_terminates_from_any_state() {
        let c = cfg(100);
        for state in [
            TradeState::Idle,
            TradeState::EnsureAuthenticated,
            TradeState::CheckResources,
            TradeState::ScanMarket,
            TradeState::Buying,
            TradeState::WaitingBlocked,
            TradeState::ErrorRecoverable,
        ] {
            let next = next_state(state, None, &PhaseOutcome::StopRequested, &c, 0);
            assert_eq!(next, TradeState::Terminated);
        }
    }

    #[test]
    fn test_terminal_states_absorb() {
        let c = cfg(100);
        for state in [TradeState::Terminated, TradeState::ErrorFatal] {
            let next = next_state(state, None, &PhaseOutcome::Started, &c, 0);
            assert_eq!(next, state);
        }
    }

    #[test]
    fn test_fatal_failure_halts() {
        let next = next_state(
            TradeState::Buying,
            None,
            &PhaseOutcome::Failure(FailureKind::Fatal),
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::ErrorFatal);
    }

    #[test]
    fn test_resource_insufficient_is_not_an_error() {
        let c = cfg(100);

        let broke = make_snapshot(0, 500, (0, 40), (0, 50), (0, 30));
        let next = next_state(
            TradeState::Buying,
            Some(&broke),
            &PhaseOutcome::Failure(FailureKind::ResourceInsufficient),
            &c,
            0,
        );
        assert_eq!(next, TradeState::WithdrawFromBank);

        let crammed = make_snapshot(1000, 0, (40, 40), (10, 50), (0, 30));
        let next = next_state(
            TradeState::Buying,
            Some(&crammed),
            &PhaseOutcome::Failure(FailureKind::ResourceInsufficient),
            &c,
            0,
        );
        assert_eq!(next, TradeState::DepositToStorage);

        let blocked = make_snapshot(0, 0, (40, 40), (50, 50), (30, 30));
        let next = next_state(
            TradeState::Selling,
            Some(&blocked),
            &PhaseOutcome::Failure(FailureKind::ResourceInsufficient),
            &c,
            0,
        );
        assert_eq!(next, TradeState::WaitingBlocked);
    }

    #[test]
    fn test_transient_failure_resumes_same_phase() {
        let mut machine = StateMachine::new(cfg(100));
        machine.advance(None, &PhaseOutcome::Started);
        machine.advance(None, &PhaseOutcome::AuthConfirmed);
        let snap = make_snapshot(1000, 0, (4, 40), (10, 50), (0, 30));
        machine.advance(Some(&snap), &PhaseOutcome::SnapshotRead);
        machine.advance(Some(&snap), &PhaseOutcome::SpaceChecked);
        assert_eq!(machine.current(), TradeState::ScanMarket);

        machine.advance(Some(&snap), &PhaseOutcome::Failure(FailureKind::Transient));
        assert_eq!(machine.current(), TradeState::ErrorRecoverable);
        assert_eq!(machine.resume_target(), TradeState::ScanMarket);
        assert_eq!(machine.resume(), TradeState::ScanMarket);
    }

    #[test]
    fn test_stale_state_resumes_at_resource_check() {
        let mut machine = StateMachine::new(cfg(100));
        machine.advance(None, &PhaseOutcome::Started);
        machine.advance(None, &PhaseOutcome::AuthConfirmed);
        let snap = make_snapshot(1000, 0, (4, 40), (10, 50), (0, 30));
        machine.advance(Some(&snap), &PhaseOutcome::SnapshotRead);
        machine.advance(Some(&snap), &PhaseOutcome::SpaceChecked);

        machine.advance(Some(&snap), &PhaseOutcome::Failure(FailureKind::StaleState));
        assert_eq!(machine.current(), TradeState::ErrorRecoverable);
        assert_eq!(machine.resume(), TradeState::CheckResources);
    }

    #[test]
    fn test_auth_retries_bounded() {
        let mut machine = StateMachine::new(cfg(100)); // max_auth_retries = 3
        machine.advance(None, &PhaseOutcome::Started);
        assert_eq!(machine.current(), TradeState::EnsureAuthenticated);

        // First two denials back off and retry the login.
        machine.advance(None, &PhaseOutcome::AuthDenied);
        assert_eq!(machine.current(), TradeState::ErrorRecoverable);
        assert_eq!(machine.resume(), TradeState::EnsureAuthenticated);

        machine.advance(None, &PhaseOutcome::AuthDenied);
        assert_eq!(machine.resume(), TradeState::EnsureAuthenticated);

        // The third denial exhausts the budget.
        machine.advance(None, &PhaseOutcome::AuthDenied);
        assert_eq!(machine.current(), TradeState::ErrorFatal);
    }

    #[test]
    fn test_session_lost_routes_to_reauthentication() {
        let next = next_state(
            TradeState::ScanMarket,
            None,
            &PhaseOutcome::SessionLost,
            &cfg(100),
            0,
        );
        assert_eq!(next, TradeState::EnsureAuthenticated);
    }
}
