//! Process-wide circuit breaker guarding the generation collaborator.
//!
//! One instance is shared by every concurrent repair loop. All state lives in
//! atomics; the Closed→Open transition is a compare-and-swap, so a race where
//! two loops push the failure counter past the threshold still opens the
//! breaker exactly once. Cancelled loops simply never record their outcome;
//! nothing here double-counts.

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Allowed,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Milliseconds since `epoch` when the breaker last opened, offset by one
    /// so zero means "never".
    opened_at_ms: AtomicU64,
    /// Wall-clock open time for snapshots only.
    opened_at_unix_ms: AtomicI64,
    times_opened: AtomicU64,
    epoch: Instant,
    threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            opened_at_unix_ms: AtomicI64::new(0),
            times_opened: AtomicU64::new(0),
            epoch: Instant::now(),
            threshold,
            cooldown,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Gate for a new repair iteration. While open, rejects until the cooldown
    /// elapses; the first acquire after cooldown flips to half-open and is let
    /// through as a probe.
    pub fn try_acquire(&self) -> Acquire {
        match self.state.load(Ordering::Acquire) {
            CLOSED | HALF_OPEN => Acquire::Allowed,
            _ => {
                let opened = self.opened_at_ms.load(Ordering::Acquire);
                if opened == 0 {
                    return Acquire::Allowed;
                }
                let elapsed = self.now_ms().saturating_sub(opened - 1);
                if Duration::from_millis(elapsed) < self.cooldown {
                    return Acquire::Rejected;
                }
                // first caller past the cooldown wins the probe slot; a lost
                // race means someone else already moved the state on
                if self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::info!("circuit breaker half-open, allowing probe");
                }
                Acquire::Allowed
            }
        }
    }

    /// Record the outcome of one gated iteration.
    pub fn record_outcome(&self, success: bool) {
        if success {
            match self.state.load(Ordering::Acquire) {
                HALF_OPEN => {
                    if self
                        .state
                        .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.consecutive_failures.store(0, Ordering::Release);
                        self.opened_at_ms.store(0, Ordering::Release);
                        tracing::info!("circuit breaker closed after successful probe");
                    }
                }
                CLOSED => {
                    self.consecutive_failures.store(0, Ordering::Release);
                }
                // success from an iteration that was in flight before the
                // breaker opened; the probe path owns recovery
                _ => {}
            }
            return;
        }

        match self.state.load(Ordering::Acquire) {
            HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.mark_opened();
                    tracing::warn!("circuit breaker re-opened after failed probe");
                }
            }
            CLOSED => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.threshold
                    && self
                        .state
                        .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.mark_opened();
                    tracing::warn!(failures, "circuit breaker opened");
                }
            }
            // already open: late failures from in-flight iterations do not
            // extend the cooldown
            _ => {}
        }
    }

    fn mark_opened(&self) {
        self.opened_at_ms.store(self.now_ms() + 1, Ordering::Release);
        self.opened_at_unix_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        self.times_opened.fetch_add(1, Ordering::AcqRel);
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Total number of Closed/HalfOpen → Open transitions.
    pub fn times_opened(&self) -> u64 {
        self.times_opened.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let opened_unix = self.opened_at_unix_ms.load(Ordering::Acquire);
        let opened_at = match self.state() {
            BreakerState::Closed => None,
            _ => DateTime::<Utc>::from_timestamp_millis(opened_unix),
        };
        BreakerSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            opened_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::with_config(5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.record_outcome(false);
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_outcome(false);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.try_acquire(), Acquire::Rejected);
        assert!(breaker.snapshot().opened_at.is_some());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::with_config(5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.record_outcome(false);
        }
        breaker.record_outcome(true);
        for _ in 0..4 {
            breaker.record_outcome(false);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn cooldown_elapsing_allows_a_probe() {
        let breaker = CircuitBreaker::with_config(1, Duration::from_millis(20));
        breaker.record_outcome(false);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.try_acquire(), Acquire::Rejected);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.try_acquire(), Acquire::Allowed);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_on_success_and_reopens_on_failure() {
        let breaker = CircuitBreaker::with_config(1, Duration::from_millis(10));
        breaker.record_outcome(false);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.try_acquire(), Acquire::Allowed);
        breaker.record_outcome(true);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);

        breaker.record_outcome(false);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.try_acquire(), Acquire::Allowed);
        breaker.record_outcome(false);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.try_acquire(), Acquire::Rejected);
    }

    #[test]
    fn racing_failures_open_exactly_once() {
        let breaker = Arc::new(CircuitBreaker::with_config(5, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = Arc::clone(&breaker);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    b.record_outcome(false);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.times_opened(), 1);
    }
}
