//! Cycle driver: the outer loop.
//!
//! Owns the one `TradeCycleContext` and the one remote session, advances
//! the state machine phase by phase, and enforces the concurrency model:
//! a single logical thread of control, a paced delay before every
//! externally observable action, a timeout on every gateway call, and a
//! stop signal that aborts any suspension point and unwinds cleanly to
//! `Terminated`.
//!
//! No two mutating calls are ever in flight at once; a mutating call
//! whose confirmation was not observed is reconciled by a fresh read on
//! resume, never blindly retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::machine::{MachineConfig, PhaseOutcome, StateMachine};
use crate::failure::{classify, BackoffDecision, BackoffPolicy, BackoffScheduler, FailureKind};
use crate::gateway::{
    AuthResult, Credentials, GatewayError, ListingOutcome, MarketSession, PurchaseOutcome,
};
use crate::pacing::{ActionKind, PacingEngine};
use crate::storage::{self, PersistedSession};
use crate::strategy::{BuyPlanner, ScoredOffer, SellPlanner};
use crate::types::{
    EngineStatus, HoldingLot, ListingOrder, ResourceSnapshot, SessionCounters, TradeState,
};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub normal_wait: Duration,
    /// Full block: only an external sale can unblock us, so poll slowly.
    pub blocked_wait: Duration,
    pub auth_retry_wait: Duration,
    pub operation_timeout: Duration,
    /// 0 = run until stopped.
    pub max_cycles: u64,
    /// Item kinds scanned each cycle.
    pub scan_kinds: Vec<String>,
    pub max_rows_per_scan: u32,
    /// Where session state is persisted after each cycle. None = no persistence.
    pub state_file: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            normal_wait: Duration::from_secs(60),
            blocked_wait: Duration::from_secs(300),
            auth_retry_wait: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(60),
            max_cycles: 0,
            scan_kinds: Vec::new(),
            max_rows_per_scan: 75,
            state_file: None,
        }
    }
}

/// Interval to sleep in a waiting state. The full-block state polls at
/// the long interval; everything else uses the normal one.
pub fn wait_interval(state: TradeState, settings: &EngineSettings) -> Duration {
    match state {
        TradeState::WaitingBlocked => settings.blocked_wait,
        _ => settings.normal_wait,
    }
}

// ---------------------------------------------------------------------------
// Context & host surface
// ---------------------------------------------------------------------------

/// Mutable cycle state, exclusively owned by the driver. Exactly one
/// context exists per engine; there are no concurrent cycles.
struct TradeCycleContext {
    snapshot: Option<ResourceSnapshot>,
    holdings: Vec<HoldingLot>,
    live_listings: Vec<ListingOrder>,
    counters: SessionCounters,
    buy_queue: Vec<ScoredOffer>,
    /// Backoff delay to serve before leaving `ErrorRecoverable`.
    pending_recovery: Option<Duration>,
    cycle_started_at: chrono::DateTime<Utc>,
}

/// Handle the host uses to assert cancellation. Stopping is idempotent.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// What the engine did before halting.
#[derive(Debug)]
pub struct RunSummary {
    pub final_state: TradeState,
    pub counters: SessionCounters,
    pub holdings: Vec<HoldingLot>,
}

// ---------------------------------------------------------------------------
// Guarded calls
// ---------------------------------------------------------------------------

enum CallOutcome<T> {
    Done(Result<T, GatewayError>),
    TimedOut,
    Stopped,
}

/// Run one gateway call under the operation timeout, racing the stop
/// signal. Used for every suspension point in the engine.
async fn guarded<T, F>(
    limit: Duration,
    stop: &mut watch::Receiver<bool>,
    fut: F,
) -> CallOutcome<T>
where
    F: std::future::Future<Output = Result<T, GatewayError>>,
{
    if *stop.borrow() {
        return CallOutcome::Stopped;
    }
    tokio::select! {
        _ = stop.changed() => CallOutcome::Stopped,
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => CallOutcome::Done(inner),
            Err(_) => CallOutcome::TimedOut,
        },
    }
}

/// Sleep that aborts the instant the stop signal fires.
/// Returns false if the sleep was interrupted.
async fn interruptible_sleep(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = stop.changed() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct CycleDriver {
    session: Arc<dyn MarketSession>,
    credentials: Credentials,
    settings: EngineSettings,
    machine: StateMachine,
    buy_planner: BuyPlanner,
    sell_planner: SellPlanner,
    pacing: PacingEngine,
    backoff: BackoffScheduler,
    ctx: TradeCycleContext,
    cycles_this_run: u64,
    status_tx: watch::Sender<EngineStatus>,
    status_rx: watch::Receiver<EngineStatus>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl CycleDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<dyn MarketSession>,
        credentials: Credentials,
        settings: EngineSettings,
        machine_config: MachineConfig,
        buy_planner: BuyPlanner,
        sell_planner: SellPlanner,
        pacing: PacingEngine,
        backoff_policy: BackoffPolicy,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(EngineStatus::initial());
        Self {
            session,
            credentials,
            settings,
            machine: StateMachine::new(machine_config),
            buy_planner,
            sell_planner,
            pacing,
            backoff: BackoffScheduler::new(backoff_policy),
            ctx: TradeCycleContext {
                snapshot: None,
                holdings: Vec::new(),
                live_listings: Vec::new(),
                counters: SessionCounters::new(),
                buy_queue: Vec::new(),
                pending_recovery: None,
                cycle_started_at: Utc::now(),
            },
            cycles_this_run: 0,
            status_tx,
            status_rx,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// Resume counters, holdings, and listings from a persisted session.
    pub fn with_restored(mut self, restored: PersistedSession) -> Self {
        info!(
            cycles = restored.counters.cycles_completed,
            holdings = restored.holdings.len(),
            listings = restored.listings.len(),
            "Resuming persisted session state"
        );
        self.ctx.counters = restored.counters;
        self.ctx.holdings = restored.holdings;
        self.ctx.live_listings = restored.listings;
        self
    }

    /// Cancellation handle for the host. Obtain before calling `run`.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Read-only status feed for external logging. Obtain before `run`.
    pub fn status_feed(&self) -> watch::Receiver<EngineStatus> {
        self.status_rx.clone()
    }

    /// Drive trading cycles until a terminal state is reached.
    pub async fn run(mut self) -> RunSummary {
        info!(session = self.session.name(), "Cycle driver starting");
        self.machine.advance(None, &PhaseOutcome::Started);
        self.publish();

        while !self.machine.current().is_terminal() {
            if *self.stop_rx.borrow() {
                let snapshot = self.ctx.snapshot.clone();
                self.machine
                    .advance(snapshot.as_ref(), &PhaseOutcome::StopRequested);
                self.publish();
                break;
            }

            let state = self.machine.current();

            // Recovery is handled outside the outcome path: serve the
            // backoff delay, then jump to the stored resume target.
            if state == TradeState::ErrorRecoverable {
                let delay = self
                    .ctx
                    .pending_recovery
                    .take()
                    .unwrap_or(self.settings.auth_retry_wait);
                info!(secs = delay.as_secs(), "Backing off before recovery");
                if interruptible_sleep(delay, &mut self.stop_rx).await {
                    self.ctx.counters.failures_recovered += 1;
                    self.machine.resume();
                } else {
                    let snapshot = self.ctx.snapshot.clone();
                    self.machine
                        .advance(snapshot.as_ref(), &PhaseOutcome::StopRequested);
                }
                self.publish();
                continue;
            }

            let outcome = match state {
                TradeState::Idle => PhaseOutcome::Started,
                TradeState::EnsureAuthenticated => self.phase_authenticate().await,
                TradeState::CheckResources => self.phase_check_resources().await,
                TradeState::WithdrawFromBank => self.phase_withdraw().await,
                TradeState::EnsureSpace => PhaseOutcome::SpaceChecked,
                TradeState::DepositToStorage => self.phase_deposit().await,
                TradeState::ScanMarket => self.phase_scan().await,
                TradeState::Buying => self.phase_buying().await,
                TradeState::Selling => self.phase_selling().await,
                TradeState::WaitingNormal | TradeState::WaitingBlocked => {
                    self.phase_wait(state).await
                }
                // Terminal states exit the loop above; recovery is handled
                // before the dispatch.
                TradeState::ErrorRecoverable
                | TradeState::ErrorFatal
                | TradeState::Terminated => break,
            };

            let snapshot = self.ctx.snapshot.clone();
            self.machine.advance(snapshot.as_ref(), &outcome);

            // A completed work or wait phase closes one cycle.
            if matches!(
                outcome,
                PhaseOutcome::PhaseComplete | PhaseOutcome::WaitElapsed
            ) {
                self.close_cycle();
            }

            self.publish();
        }

        self.finish()
    }

    // -- phases ----------------------------------------------------------

    async fn phase_authenticate(&mut self) -> PhaseOutcome {
        if !self.pace(ActionKind::Authenticate).await {
            return PhaseOutcome::StopRequested;
        }
        let result = guarded(
            self.settings.operation_timeout,
            &mut self.stop_rx,
            self.session.authenticate(&self.credentials),
        )
        .await;
        match result {
            CallOutcome::Done(Ok(AuthResult::Confirmed)) => {
                info!(user = %self.credentials.username, "Session authenticated");
                PhaseOutcome::AuthConfirmed
            }
            CallOutcome::Done(Ok(AuthResult::Denied)) => {
                warn!(
                    attempt = self.machine.auth_attempts() + 1,
                    "Authentication denied"
                );
                self.ctx.pending_recovery = Some(self.settings.auth_retry_wait);
                PhaseOutcome::AuthDenied
            }
            CallOutcome::Done(Err(e)) => self.failure_outcome(e, "authenticate"),
            CallOutcome::TimedOut => self.timeout_outcome("authenticate", false),
            CallOutcome::Stopped => PhaseOutcome::StopRequested,
        }
    }

    async fn phase_check_resources(&mut self) -> PhaseOutcome {
        if !self.pace(ActionKind::Navigate).await {
            return PhaseOutcome::StopRequested;
        }
        let result = guarded(
            self.settings.operation_timeout,
            &mut self.stop_rx,
            self.session.read_resource_snapshot(),
        )
        .await;
        match result {
            CallOutcome::Done(Ok(snapshot)) => {
                debug!(%snapshot, "Snapshot read");
                self.ctx.snapshot = Some(snapshot);
                PhaseOutcome::SnapshotRead
            }
            CallOutcome::Done(Err(e)) => self.failure_outcome(e, "read_resource_snapshot"),
            CallOutcome::TimedOut => self.timeout_outcome("read_resource_snapshot", false),
            CallOutcome::Stopped => PhaseOutcome::StopRequested,
        }
    }

    async fn phase_withdraw(&mut self) -> PhaseOutcome {
        if !self.pace(ActionKind::BankTransfer).await {
            return PhaseOutcome::StopRequested;
        }
        let result = guarded(
            self.settings.operation_timeout,
            &mut self.stop_rx,
            self.session.withdraw_all_from_bank(),
        )
        .await;
        match result {
            CallOutcome::Done(Ok(true)) => {
                self.ctx.counters.bank_withdrawals += 1;
                info!("Bank withdrawal confirmed");
                PhaseOutcome::TransferApplied
            }
            CallOutcome::Done(Ok(false)) => self.failure_outcome(
                GatewayError::AmbiguousOutcome("bank withdrawal unconfirmed".to_string()),
                "withdraw_all_from_bank",
            ),
            CallOutcome::Done(Err(e)) => self.failure_outcome(e, "withdraw_all_from_bank"),
            CallOutcome::TimedOut => self.timeout_outcome("withdraw_all_from_bank", true),
            CallOutcome::Stopped => PhaseOutcome::StopRequested,
        }
    }

    async fn phase_deposit(&mut self) -> PhaseOutcome {
        if !self.pace(ActionKind::StorageTransfer).await {
            return PhaseOutcome::StopRequested;
        }
        let result = guarded(
            self.settings.operation_timeout,
            &mut self.stop_rx,
            self.session.deposit_to_storage(),
        )
        .await;
        match result {
            CallOutcome::Done(Ok(true)) => {
                self.ctx.counters.storage_deposits += 1;
                // Stored units leave the sellable pool.
                self.ctx.holdings.clear();
                info!("Storage deposit confirmed");
                PhaseOutcome::TransferApplied
            }
            CallOutcome::Done(Ok(false)) => self.failure_outcome(
                GatewayError::AmbiguousOutcome("storage deposit unconfirmed".to_string()),
                "deposit_to_storage",
            ),
            CallOutcome::Done(Err(e)) => self.failure_outcome(e, "deposit_to_storage"),
            CallOutcome::TimedOut => self.timeout_outcome("deposit_to_storage", true),
            CallOutcome::Stopped => PhaseOutcome::StopRequested,
        }
    }

    async fn phase_scan(&mut self) -> PhaseOutcome {
        let Some(snapshot) = self.ctx.snapshot.clone() else {
            return self.failure_outcome(
                GatewayError::AmbiguousOutcome("no snapshot before scan".to_string()),
                "scan_market",
            );
        };

        let kinds = self.settings.scan_kinds.clone();
        let max_rows = self.settings.max_rows_per_scan;
        let mut offers = Vec::new();
        for kind in &kinds {
            if !self.pace(ActionKind::Scan).await {
                return PhaseOutcome::StopRequested;
            }
            let result = guarded(
                self.settings.operation_timeout,
                &mut self.stop_rx,
                self.session.scan_market(kind, max_rows),
            )
            .await;
            match result {
                CallOutcome::Done(Ok(mut rows)) => {
                    debug!(kind = %kind, rows = rows.len(), "Market rows scanned");
                    offers.append(&mut rows);
                }
                CallOutcome::Done(Err(e)) => return self.failure_outcome(e, "scan_market"),
                CallOutcome::TimedOut => return self.timeout_outcome("scan_market", false),
                CallOutcome::Stopped => return PhaseOutcome::StopRequested,
            }
        }

        self.ctx.buy_queue = self.buy_planner.plan(&offers, &snapshot);
        let sellable_lots = self.ctx.holdings.len();
        info!(
            offers = offers.len(),
            queued = self.ctx.buy_queue.len(),
            sellable_lots,
            "Market scan complete"
        );
        PhaseOutcome::ScanCompleted {
            buy_queue: self.ctx.buy_queue.len(),
            sellable_lots,
        }
    }

    async fn phase_buying(&mut self) -> PhaseOutcome {
        let queue = std::mem::take(&mut self.ctx.buy_queue);
        let Some(snapshot) = self.ctx.snapshot.clone() else {
            return PhaseOutcome::PhaseComplete;
        };

        // Local running totals: the queue was planned against a snapshot
        // that ages with every confirmed purchase.
        let mut cash_left = snapshot.cash_on_hand;
        let mut slots_left = snapshot.free_inventory_slots();
        let reserve = self.buy_planner.policy().emergency_reserve;

        for scored in queue {
            let offer = scored.offer;

            // Re-validate funds and space before each individual attempt.
            if offer.total_price.saturating_add(reserve) > cash_left {
                debug!(%offer, cash_left, "Skipping offer: funds exhausted");
                continue;
            }
            if offer.quantity > slots_left {
                debug!(%offer, slots_left, "Skipping offer: no inventory space");
                continue;
            }

            if !self.pace(ActionKind::Purchase).await {
                return PhaseOutcome::StopRequested;
            }
            let result = guarded(
                self.settings.operation_timeout,
                &mut self.stop_rx,
                self.session.attempt_purchase(&offer),
            )
            .await;
            match result {
                CallOutcome::Done(Ok(PurchaseOutcome::Confirmed)) => {
                    cash_left = cash_left.saturating_sub(offer.total_price);
                    slots_left -= offer.quantity;
                    self.ctx.counters.purchases_confirmed += 1;
                    self.ctx.holdings.push(HoldingLot {
                        item_kind: offer.item_kind.clone(),
                        quantity: offer.quantity,
                        acquired_at: Utc::now(),
                        acquisition_unit_price: offer.unit_price,
                    });
                    info!(
                        %offer,
                        margin = format!("{:.0}%", scored.margin * 100.0),
                        "Purchase confirmed"
                    );
                }
                CallOutcome::Done(Ok(PurchaseOutcome::Lost)) => {
                    // Someone beat us to it; expected in a shared market.
                    self.ctx.counters.offers_lost += 1;
                    debug!(%offer, "Offer lost to another buyer");
                }
                CallOutcome::Done(Ok(PurchaseOutcome::Failed)) => {
                    self.ctx.counters.purchases_failed += 1;
                    warn!(%offer, "Purchase attempt failed");
                }
                CallOutcome::Done(Err(e)) => return self.failure_outcome(e, "attempt_purchase"),
                CallOutcome::TimedOut => return self.timeout_outcome("attempt_purchase", true),
                CallOutcome::Stopped => return PhaseOutcome::StopRequested,
            }
        }

        PhaseOutcome::PhaseComplete
    }

    async fn phase_selling(&mut self) -> PhaseOutcome {
        let Some(snapshot) = self.ctx.snapshot.clone() else {
            return PhaseOutcome::PhaseComplete;
        };

        let plan = self.sell_planner.plan(&self.ctx.holdings, &snapshot);
        for planned in plan {
            if !self.pace(ActionKind::Listing).await {
                return PhaseOutcome::StopRequested;
            }
            let result = guarded(
                self.settings.operation_timeout,
                &mut self.stop_rx,
                self.session
                    .list_for_sale(&planned.lot, planned.ask_unit_price),
            )
            .await;
            match result {
                CallOutcome::Done(Ok(ListingOutcome::Confirmed)) => {
                    self.ctx.counters.listings_created += 1;
                    self.remove_holding(&planned.lot);
                    self.ctx.live_listings.push(ListingOrder {
                        order_id: format!("ord-{}", Uuid::new_v4()),
                        item_kind: planned.lot.item_kind.clone(),
                        quantity: planned.lot.quantity,
                        ask_unit_price: planned.ask_unit_price,
                        listed_at: Utc::now(),
                    });
                    info!(
                        kind = %planned.lot.item_kind,
                        quantity = planned.lot.quantity,
                        ask = planned.ask_unit_price,
                        "Listing confirmed"
                    );
                }
                CallOutcome::Done(Ok(ListingOutcome::Failed)) => {
                    warn!(kind = %planned.lot.item_kind, "Listing attempt failed");
                }
                CallOutcome::Done(Err(e)) => return self.failure_outcome(e, "list_for_sale"),
                CallOutcome::TimedOut => return self.timeout_outcome("list_for_sale", true),
                CallOutcome::Stopped => return PhaseOutcome::StopRequested,
            }
        }

        PhaseOutcome::PhaseComplete
    }

    async fn phase_wait(&mut self, state: TradeState) -> PhaseOutcome {
        let interval = wait_interval(state, &self.settings);
        info!(state = %state, secs = interval.as_secs(), "Waiting");
        if interruptible_sleep(interval, &mut self.stop_rx).await {
            PhaseOutcome::WaitElapsed
        } else {
            PhaseOutcome::StopRequested
        }
    }

    // -- helpers ---------------------------------------------------------

    /// Sleep the paced delay for an imminent action. Returns false if the
    /// stop signal interrupted the sleep.
    async fn pace(&mut self, kind: ActionKind) -> bool {
        let delay = self.pacing.compute_next_delay(kind);
        interruptible_sleep(delay, &mut self.stop_rx).await
    }

    /// Classify a raw gateway failure and schedule its recovery.
    fn failure_outcome(&mut self, error: GatewayError, phase: &str) -> PhaseOutcome {
        if matches!(error, GatewayError::SessionExpired) {
            warn!(phase, "Session lost — re-authenticating");
            return PhaseOutcome::SessionLost;
        }

        let kind = classify(&error);
        warn!(phase, error = %error, category = %kind, "Gateway call failed");

        match kind {
            FailureKind::ResourceInsufficient | FailureKind::Fatal => PhaseOutcome::Failure(kind),
            FailureKind::Transient | FailureKind::StaleState => {
                match self.backoff.on_failure(kind) {
                    BackoffDecision::Retry { delay, attempt } => {
                        debug!(
                            category = %kind,
                            attempt,
                            delay_secs = delay.as_secs(),
                            "Backoff scheduled"
                        );
                        self.ctx.pending_recovery = Some(delay);
                        PhaseOutcome::Failure(kind)
                    }
                    BackoffDecision::Escalate => PhaseOutcome::Failure(FailureKind::Fatal),
                }
            }
        }
    }

    /// A timed-out read is transient; a timed-out mutating call is an
    /// ambiguous outcome whose truth must be re-read, never retried blind.
    fn timeout_outcome(&mut self, phase: &str, mutating: bool) -> PhaseOutcome {
        let secs = self.settings.operation_timeout.as_secs();
        let error = if mutating {
            GatewayError::AmbiguousOutcome(format!("{phase} timed out without confirmation"))
        } else {
            GatewayError::Timeout(secs)
        };
        self.failure_outcome(error, phase)
    }

    fn remove_holding(&mut self, lot: &HoldingLot) {
        if let Some(pos) = self.ctx.holdings.iter().position(|h| {
            h.item_kind == lot.item_kind
                && h.acquired_at == lot.acquired_at
                && h.quantity == lot.quantity
        }) {
            self.ctx.holdings.remove(pos);
        }
    }

    fn close_cycle(&mut self) {
        self.ctx.counters.cycles_completed += 1;
        self.cycles_this_run += 1;
        // Clean progress wipes the recoverable failure history.
        self.backoff.reset(FailureKind::Transient);
        self.backoff.reset(FailureKind::StaleState);
        self.log_cycle_summary();
        self.persist();
        self.ctx.cycle_started_at = Utc::now();

        if self.settings.max_cycles > 0 && self.cycles_this_run >= self.settings.max_cycles {
            info!(cycles = self.cycles_this_run, "Cycle budget reached — stopping");
            let snapshot = self.ctx.snapshot.clone();
            self.machine
                .advance(snapshot.as_ref(), &PhaseOutcome::StopRequested);
        }
    }

    fn log_cycle_summary(&self) {
        let c = &self.ctx.counters;
        let elapsed = Utc::now() - self.ctx.cycle_started_at;
        info!(
            cycle = c.cycles_completed,
            secs = elapsed.num_seconds(),
            purchases = c.purchases_confirmed,
            lost = c.offers_lost,
            listings = c.listings_created,
            withdrawals = c.bank_withdrawals,
            deposits = c.storage_deposits,
            cash = self.ctx.snapshot.as_ref().map(|s| s.cash_on_hand).unwrap_or(0),
            holdings = self.ctx.holdings.len(),
            "Cycle complete"
        );
    }

    fn persist(&self) {
        let Some(path) = self.settings.state_file.as_deref() else {
            return;
        };
        let state = PersistedSession {
            counters: self.ctx.counters.clone(),
            holdings: self.ctx.holdings.clone(),
            listings: self.ctx.live_listings.clone(),
        };
        if let Err(e) = storage::save_session(&state, Some(path)) {
            error!(error = %e, path, "Failed to persist session state");
        }
    }

    fn publish(&self) {
        let _ = self.status_tx.send(EngineStatus {
            state: self.machine.current(),
            snapshot: self.ctx.snapshot.clone(),
            counters: self.ctx.counters.clone(),
        });
    }

    fn finish(self) -> RunSummary {
        let final_state = self.machine.current();
        self.persist();

        if final_state == TradeState::ErrorFatal {
            error!(
                state = %final_state,
                snapshot = ?self.ctx.snapshot,
                transient_failures = self.backoff.consecutive(FailureKind::Transient),
                stale_failures = self.backoff.consecutive(FailureKind::StaleState),
                cycles = self.ctx.counters.cycles_completed,
                "Engine halted on fatal error — operator intervention required"
            );
        } else {
            info!(
                state = %final_state,
                cycles = self.ctx.counters.cycles_completed,
                purchases = self.ctx.counters.purchases_confirmed,
                listings = self.ctx.counters.listings_created,
                "Engine stopped"
            );
        }

        RunSummary {
            final_state,
            counters: self.ctx.counters,
            holdings: self.ctx.holdings,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
