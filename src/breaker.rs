//! Circuit breaker gating proposal creation and execution
//!
//! Tracks failures in a rolling window and exposes a three-state gate:
//!
//! ```text
//! Closed --[threshold failures in window]--> Open
//! Open   --[reset timeout elapsed]---------> HalfOpen
//! HalfOpen --[success]--> Closed
//! HalfOpen --[failure]--> Open
//! ```
//!
//! Ambiguity is treated as failure: the gate only reopens through the
//! probationary half-open state or an explicit operator reset.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::{AuditEntry, AuditLog, AuditSeverity};
use crate::clock::Clock;

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Rolling failure window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Time the breaker stays open before probing
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    /// Probe attempts allowed while half-open
    #[serde(default = "default_half_open_max_attempts")]
    pub half_open_max_attempts: u32,

    /// Audit ring capacity
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

fn default_failure_threshold() -> u32 { 3 }
fn default_window_secs() -> u64 { 300 }
fn default_reset_timeout_secs() -> u64 { 60 }
fn default_half_open_max_attempts() -> u32 { 3 }
fn default_audit_capacity() -> usize { 1000 }

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_max_attempts: default_half_open_max_attempts(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Read-only status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub failure_threshold: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub half_open_attempts: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Persistable breaker state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: Vec<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<DateTime<Utc>>,
    total_failures: u64,
    total_successes: u64,
    half_open_attempts: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            total_failures: 0,
            total_successes: 0,
            half_open_attempts: 0,
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
        }
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some(at) = self.failures.front() {
            if *at < cutoff {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Failure-detecting gate consulted before every proposal creation and execution
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
    audit: AuditLog,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let audit = AuditLog::new(config.audit_capacity);
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner::new()),
            audit,
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.config.window_secs as i64)
    }

    fn reset_timeout(&self) -> Duration {
        Duration::seconds(self.config.reset_timeout_secs as i64)
    }

    /// Whether a proposal may be created or executed right now
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open here.
    /// Each `true` answer while half-open consumes one probe attempt.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.prune(now - self.window());

        let state = inner.state;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                if now - opened_at >= self.reset_timeout() {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_attempts = 1;
                    drop(inner);
                    self.audit.record(
                        AuditEntry::new(now, "circuit_half_open", AuditSeverity::Warning)
                            .with_detail("open_for_secs", (now - opened_at).num_seconds()),
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts < self.config.half_open_max_attempts {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    debug!(
                        attempts = inner.half_open_attempts,
                        "Half-open probe budget exhausted"
                    );
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.last_success_at = Some(now);

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            inner.opened_at = None;
            inner.half_open_attempts = 0;
            drop(inner);
            self.audit.record(AuditEntry::new(
                now,
                "circuit_closed",
                AuditSeverity::Info,
            ));
        }
    }

    /// Record a failure; may open the breaker
    pub fn record_failure(&self, reason: &str) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failures.push_back(now);
        inner.prune(now - self.window());
        inner.total_failures += 1;
        inner.last_failure_at = Some(now);
        let in_window = inner.failures.len();

        let state = inner.state;
        let transition = match state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.half_open_attempts = 0;
                Some("circuit_reopened")
            }
            CircuitState::Closed if in_window >= self.config.failure_threshold as usize => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                Some("circuit_opened")
            }
            _ => None,
        };
        drop(inner);

        self.audit.record(
            AuditEntry::new(now, "failure_recorded", AuditSeverity::Warning)
                .with_detail("reason", reason)
                .with_detail("failures_in_window", in_window),
        );

        if let Some(event) = transition {
            warn!(
                reason = %reason,
                failures_in_window = in_window,
                "Circuit breaker OPEN ({})",
                event
            );
            self.audit.record(
                AuditEntry::new(now, event, AuditSeverity::Critical)
                    .with_detail("reason", reason)
                    .with_detail("failures_in_window", in_window),
            );
        }
    }

    /// Operator escape hatch: return to closed and clear all counters
    pub fn force_reset(&self) {
        let now = self.clock.now();
        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            *inner = BreakerInner::new();
            previous
        };

        warn!(previous = %previous, "Circuit breaker force reset by operator");
        self.audit.record(
            AuditEntry::new(now, "force_reset", AuditSeverity::Manual)
                .with_detail("previous_state", previous.to_string()),
        );
    }

    /// Operator pause: open the breaker immediately
    pub fn force_open(&self, reason: &str) {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.half_open_attempts = 0;
        }

        warn!(reason = %reason, "Circuit breaker forced OPEN by operator");
        self.audit.record(
            AuditEntry::new(now, "force_open", AuditSeverity::Manual).with_detail("reason", reason),
        );
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn status(&self) -> BreakerStatus {
        let cutoff = self.clock.now() - self.window();
        let inner = self.inner.lock();
        BreakerStatus {
            state: inner.state,
            failures_in_window: inner.failures.iter().filter(|at| **at >= cutoff).count(),
            failure_threshold: self.config.failure_threshold,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            half_open_attempts: inner.half_open_attempts,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
            opened_at: inner.opened_at,
        }
    }

    pub fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failures: inner.failures.iter().copied().collect(),
            opened_at: inner.opened_at,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
        }
    }

    /// Load persisted state (e.g. after restart)
    pub fn restore(&self, snapshot: BreakerSnapshot) {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            inner.state = snapshot.state;
            inner.failures = snapshot.failures.into_iter().collect();
            inner.opened_at = snapshot.opened_at;
            inner.last_failure_at = snapshot.last_failure_at;
            inner.last_success_at = snapshot.last_success_at;
            inner.half_open_attempts = 0;
            inner.prune(now - self.window());
        }
        self.audit.record(
            AuditEntry::new(now, "state_restored", AuditSeverity::Info)
                .with_detail("state", snapshot.state.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_breaker(threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            window_secs: 60,
            reset_timeout_secs: 30,
            half_open_max_attempts: 2,
            audit_capacity: 100,
        };
        (CircuitBreaker::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_opens_after_threshold() {
        let (breaker, _clock) = test_breaker(3);
        breaker.record_failure("a");
        breaker.record_failure("b");
        assert!(breaker.can_execute());
        breaker.record_failure("c");

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_old_failures_pruned() {
        let (breaker, clock) = test_breaker(2);
        breaker.record_failure("a");
        clock.advance(Duration::seconds(61));
        breaker.record_failure("b");

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().failures_in_window, 1);
    }

    #[test]
    fn test_half_open_after_reset_timeout() {
        let (breaker, clock) = test_breaker(1);
        breaker.record_failure("boom");
        assert!(!breaker.can_execute());

        clock.advance(Duration::seconds(30));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (breaker, clock) = test_breaker(1);
        breaker.record_failure("boom");
        clock.advance(Duration::seconds(31));
        assert!(breaker.can_execute());

        breaker.record_failure("probe failed");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_half_open_success_closes_and_clears() {
        let (breaker, clock) = test_breaker(1);
        breaker.record_failure("boom");
        clock.advance(Duration::seconds(31));
        assert!(breaker.can_execute());

        breaker.record_success();
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures_in_window, 0);
        assert!(status.opened_at.is_none());
    }

    #[test]
    fn test_half_open_probe_budget() {
        let (breaker, clock) = test_breaker(1);
        breaker.record_failure("boom");
        clock.advance(Duration::seconds(31));

        assert!(breaker.can_execute()); // transition, attempt 1
        assert!(breaker.can_execute()); // attempt 2
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_force_reset_logged_as_manual() {
        let (breaker, _clock) = test_breaker(1);
        breaker.record_failure("boom");
        breaker.force_reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().total_failures, 0);
        let last = breaker.audit_log(1).pop().unwrap();
        assert_eq!(last.event, "force_reset");
        assert_eq!(last.severity, AuditSeverity::Manual);

        let opened = breaker
            .audit_log(10)
            .into_iter()
            .find(|e| e.event == "circuit_opened")
            .unwrap();
        assert_eq!(opened.severity, AuditSeverity::Critical);
    }

    #[test]
    fn test_force_open() {
        let (breaker, _clock) = test_breaker(5);
        breaker.force_open("suspicious mint spike");
        assert!(!breaker.can_execute());
        assert_eq!(breaker.audit_log(1)[0].severity, AuditSeverity::Manual);
    }

    #[test]
    fn test_snapshot_restore() {
        let (breaker, _clock) = test_breaker(2);
        breaker.record_failure("a");
        breaker.record_failure("b");
        let snapshot = breaker.snapshot();

        let (fresh, _) = test_breaker(2);
        fresh.restore(snapshot.clone());
        assert_eq!(fresh.state(), CircuitState::Open);
        assert_eq!(fresh.snapshot().failures, snapshot.failures);
    }
}
