//! Failure classification and backoff scheduling.
//!
//! Turns raw gateway failures into one of four recovery routes and
//! computes how long to wait before the next attempt. All retry policy is
//! concentrated here; no other module owns a wait constant for failures.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::gateway::GatewayError;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Recovery route for a failed gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Retry the same phase after a backoff delay.
    Transient,
    /// Cached snapshot/candidates are suspect; re-read truth and resume
    /// from the resource check.
    StaleState,
    /// Not an error: the remote side lacks funds or space. Folded into the
    /// matching withdraw/deposit/waiting transition.
    ResourceInsufficient,
    /// Unrecoverable; halt the engine with full context.
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Transient => "transient",
            FailureKind::StaleState => "stale_state",
            FailureKind::ResourceInsufficient => "resource_insufficient",
            FailureKind::Fatal => "fatal",
        };
        write!(f, "{name}")
    }
}

/// Map a raw gateway failure onto its recovery route.
///
/// An ambiguous outcome of a mutating call is stale state: truth must be
/// re-read, never blindly retried, or the mutation could apply twice.
pub fn classify(error: &GatewayError) -> FailureKind {
    match error {
        GatewayError::Timeout(_) | GatewayError::Network(_) => FailureKind::Transient,
        GatewayError::InterfaceDrift(_)
        | GatewayError::AmbiguousOutcome(_)
        | GatewayError::SessionExpired => FailureKind::StaleState,
        GatewayError::ResourceRejected(_) => FailureKind::ResourceInsufficient,
        GatewayError::AccountLocked(_) => FailureKind::Fatal,
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Consecutive failures tolerated per category before escalation.
    pub max_consecutive: u32,
    /// Quiet period after which a category's consecutive count resets.
    pub cooldown: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            max_consecutive: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Failure history for one category.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub consecutive: u32,
    pub last_at: Instant,
}

/// What the engine should do about a just-recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Wait this long, then retry. `attempt` is 1-based.
    Retry { delay: Duration, attempt: u32 },
    /// The category has exceeded its threshold; escalate to fatal.
    Escalate,
}

/// Tracks consecutive failures per category and computes exponential
/// backoff delays: `delay_n = base × multiplier^(n-1)`, capped.
pub struct BackoffScheduler {
    policy: BackoffPolicy,
    records: HashMap<FailureKind, FailureRecord>,
}

impl BackoffScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    /// Record a failure and decide whether to retry or escalate.
    pub fn on_failure(&mut self, kind: FailureKind) -> BackoffDecision {
        self.on_failure_at(kind, Instant::now())
    }

    /// Clear the history for a category after clean progress.
    pub fn reset(&mut self, kind: FailureKind) {
        self.records.remove(&kind);
    }

    /// Consecutive count currently recorded for a category.
    pub fn consecutive(&self, kind: FailureKind) -> u32 {
        self.records.get(&kind).map(|r| r.consecutive).unwrap_or(0)
    }

    fn on_failure_at(&mut self, kind: FailureKind, now: Instant) -> BackoffDecision {
        let record = self.records.entry(kind).or_insert(FailureRecord {
            consecutive: 0,
            last_at: now,
        });

        // A long quiet spell wipes the slate for this category.
        if record.consecutive > 0 && now.duration_since(record.last_at) >= self.policy.cooldown {
            record.consecutive = 0;
        }

        record.consecutive += 1;
        record.last_at = now;
        let attempt = record.consecutive;

        if attempt > self.policy.max_consecutive {
            warn!(
                category = %kind,
                consecutive = attempt,
                threshold = self.policy.max_consecutive,
                "Failure threshold exceeded — escalating"
            );
            return BackoffDecision::Escalate;
        }

        let exp = self.policy.multiplier.powi(attempt as i32 - 1);
        let raw_ms = self.policy.base_delay.as_millis() as f64 * exp;
        let delay = Duration::from_millis(raw_ms as u64).min(self.policy.max_delay);

        BackoffDecision::Retry { delay, attempt }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_ms(base: u64, max: u64, max_consecutive: u32) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(base),
            multiplier: 2.0,
            max_delay: Duration::from_millis(max),
            max_consecutive,
            cooldown: Duration::from_secs(300),
        }
    }

    fn retry_delay(decision: BackoffDecision) -> Duration {
        match decision {
            BackoffDecision::Retry { delay, .. } => delay,
            BackoffDecision::Escalate => panic!("expected retry, got escalation"),
        }
    }

    #[test]
    fn test_classification_taxonomy() {
        assert_eq!(classify(&GatewayError::Timeout(60)), FailureKind::Transient);
        assert_eq!(
            classify(&GatewayError::Network("reset".into())),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&GatewayError::InterfaceDrift("row gone".into())),
            FailureKind::StaleState
        );
        assert_eq!(
            classify(&GatewayError::AmbiguousOutcome("buy unconfirmed".into())),
            FailureKind::StaleState
        );
        assert_eq!(classify(&GatewayError::SessionExpired), FailureKind::StaleState);
        assert_eq!(
            classify(&GatewayError::ResourceRejected("no slots".into())),
            FailureKind::ResourceInsufficient
        );
        assert_eq!(
            classify(&GatewayError::AccountLocked("flagged".into())),
            FailureKind::Fatal
        );
    }

    #[test]
    fn test_three_failures_strictly_increasing_then_capped() {
        let mut sched = BackoffScheduler::new(policy_ms(100, 250, 5));

        let d1 = retry_delay(sched.on_failure(FailureKind::Transient));
        let d2 = retry_delay(sched.on_failure(FailureKind::Transient));
        let d3 = retry_delay(sched.on_failure(FailureKind::Transient));

        assert!(d1 < d2, "{d1:?} !< {d2:?}");
        assert!(d2 < d3, "{d2:?} !< {d3:?}");
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(250)); // capped

        // Past the cap delays stop growing.
        let d4 = retry_delay(sched.on_failure(FailureKind::Transient));
        assert_eq!(d4, Duration::from_millis(250));
    }

    #[test]
    fn test_escalates_past_threshold() {
        let mut sched = BackoffScheduler::new(policy_ms(100, 10_000, 3));
        for _ in 0..3 {
            assert!(matches!(
                sched.on_failure(FailureKind::Transient),
                BackoffDecision::Retry { .. }
            ));
        }
        assert_eq!(
            sched.on_failure(FailureKind::Transient),
            BackoffDecision::Escalate
        );
    }

    #[test]
    fn test_categories_tracked_independently() {
        let mut sched = BackoffScheduler::new(policy_ms(100, 10_000, 3));
        sched.on_failure(FailureKind::Transient);
        sched.on_failure(FailureKind::Transient);
        assert_eq!(sched.consecutive(FailureKind::Transient), 2);
        assert_eq!(sched.consecutive(FailureKind::StaleState), 0);

        let d = retry_delay(sched.on_failure(FailureKind::StaleState));
        assert_eq!(d, Duration::from_millis(100)); // fresh category, first delay
    }

    #[test]
    fn test_cooldown_resets_count() {
        let mut sched = BackoffScheduler::new(BackoffPolicy {
            cooldown: Duration::from_secs(60),
            ..policy_ms(100, 10_000, 3)
        });

        let start = Instant::now();
        sched.on_failure_at(FailureKind::Transient, start);
        sched.on_failure_at(FailureKind::Transient, start + Duration::from_secs(1));
        assert_eq!(sched.consecutive(FailureKind::Transient), 2);

        // A quiet minute later the category starts over.
        let d = retry_delay(
            sched.on_failure_at(FailureKind::Transient, start + Duration::from_secs(90)),
        );
        assert_eq!(d, Duration::from_millis(100));
        assert_eq!(sched.consecutive(FailureKind::Transient), 1);
    }

    #[test]
    fn test_reset_clears_category() {
        let mut sched = BackoffScheduler::new(policy_ms(100, 10_000, 3));
        sched.on_failure(FailureKind::Transient);
        sched.on_failure(FailureKind::Transient);
        sched.reset(FailureKind::Transient);
        assert_eq!(sched.consecutive(FailureKind::Transient), 0);

        let d = retry_delay(sched.on_failure(FailureKind::Transient));
        assert_eq!(d, Duration::from_millis(100));
    }
}
