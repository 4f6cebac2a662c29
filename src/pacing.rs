//! Humanized pacing.
//!
//! Computes the delay inserted before every externally observable action
//! so the session's cadence stays inside human-plausible bounds and under
//! the hourly action budget. All timing policy lives here; the engine
//! asks for a delay and sleeps it; nothing else in the crate decides how
//! long an action should take.
//!
//! The engine holds no business state. Aborting a pending delay is the
//! driver's job: it sleeps the returned duration under `tokio::select!`
//! against the stop signal.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Trailing window for the action-rate budget.
const RATE_WINDOW: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Action kinds
// ---------------------------------------------------------------------------

/// What kind of externally observable action is about to happen.
///
/// Different gestures take humans different amounts of time: reading a
/// market page is slower than glancing at a balance, committing to a
/// purchase slower still.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Navigate,
    Scan,
    Purchase,
    Listing,
    BankTransfer,
    StorageTransfer,
    Authenticate,
}

impl ActionKind {
    /// Multiplier applied to the sampled base delay.
    fn base_scale(&self) -> f64 {
        match self {
            ActionKind::Navigate => 0.8,
            ActionKind::Scan => 1.0,
            ActionKind::Purchase => 1.25,
            ActionKind::Listing => 1.25,
            ActionKind::BankTransfer => 1.1,
            ActionKind::StorageTransfer => 1.1,
            ActionKind::Authenticate => 1.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Base delay window sampled uniformly.
    pub min_action_delay: Duration,
    pub max_action_delay: Duration,
    /// Extra jitter window on top of the base.
    pub jitter: Duration,
    /// Hourly action ceiling the remote side tolerates.
    pub max_actions_per_hour: u32,
    /// Fraction of the hourly budget at which throttling starts.
    pub throttle_threshold: f64,
    /// Extra delay injected at (or beyond) the full budget.
    pub max_throttle: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_action_delay: Duration::from_millis(800),
            max_action_delay: Duration::from_millis(2500),
            jitter: Duration::from_millis(400),
            max_actions_per_hour: 50,
            throttle_threshold: 0.6,
            max_throttle: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Computes human-plausible, rate-limited delays.
///
/// Each call to [`compute_next_delay`](Self::compute_next_delay) counts as
/// one action against the trailing-hour budget.
pub struct PacingEngine {
    config: PacingConfig,
    recent: VecDeque<Instant>,
}

impl PacingEngine {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            recent: VecDeque::new(),
        }
    }

    /// Delay to sleep before the next action of the given kind.
    pub fn compute_next_delay(&mut self, kind: ActionKind) -> Duration {
        self.compute_at(kind, Instant::now())
    }

    /// Number of actions recorded in the trailing hour.
    pub fn actions_in_window(&self) -> usize {
        self.recent.len()
    }

    fn compute_at(&mut self, kind: ActionKind, now: Instant) -> Duration {
        self.prune(now);
        self.recent.push_back(now);

        let min_ms = self.config.min_action_delay.as_millis() as u64;
        let max_ms = self.config.max_action_delay.as_millis() as u64;
        let base_ms = fastrand::u64(min_ms..=max_ms);
        let scaled_ms = (base_ms as f64 * kind.base_scale()) as u64;

        let jitter_ms = match self.config.jitter.as_millis() as u64 {
            0 => 0,
            j => fastrand::u64(0..=j),
        };

        let throttle_ms = self.throttle_extra(now);
        let total = Duration::from_millis(scaled_ms + jitter_ms + throttle_ms);

        debug!(
            kind = ?kind,
            base_ms = scaled_ms,
            jitter_ms,
            throttle_ms,
            window_actions = self.recent.len(),
            "Pacing delay computed"
        );

        total
    }

    /// Extra delay proportional to how close the trailing-hour count sits
    /// to the configured ceiling. Zero below the throttle threshold, the
    /// full `max_throttle` at or beyond the ceiling.
    fn throttle_extra(&self, _now: Instant) -> u64 {
        let ceiling = self.config.max_actions_per_hour.max(1) as f64;
        let pressure = self.recent.len() as f64 / ceiling;
        let threshold = self.config.throttle_threshold;
        if pressure <= threshold {
            return 0;
        }
        let span = (1.0 - threshold).max(f64::EPSILON);
        let over = ((pressure - threshold) / span).min(1.0);
        (over * self.config.max_throttle.as_millis() as f64) as u64
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) >= RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
