//! Per-endpoint failure isolation
//!
//! # States
//! - Closed: normal operation, attempts pass through
//! - Open: endpoint assumed down, attempts fail fast
//! - Half-Open: probing whether the endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open:      failure_count reaches failure_threshold
//! Open → Half-Open:   reset_timeout elapsed (evaluated lazily on the
//!                     calling thread, no background timer)
//! Half-Open → Closed: success_count reaches success_threshold
//! Half-Open → Open:   any failure
//! ```
//!
//! Entering Closed resets both counters; entering Half-Open resets only the
//! success counter. Every transition stamps the state-change time.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CircuitBreakerConfig;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing attempts.
    Closed,
    /// Circuit is open, rejecting attempts.
    Open,
    /// Circuit is half-open, probing for recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time view of a breaker, for operators and diagnostics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStatus {
    /// Current state.
    pub state: CircuitState,
    /// Closed-state consecutive failure count.
    pub failure_count: u32,
    /// Half-open success count.
    pub success_count: u32,
    /// Remaining cooldown before a probe is permitted. `Some` only while
    /// open.
    pub retry_after: Option<Duration>,
    /// How long the breaker has been in its current state.
    pub since_state_change: Duration,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_state_change: Instant,
}

impl BreakerInner {
    fn transition_to(&mut self, new_state: CircuitState, now: Instant) {
        if self.state == new_state {
            return;
        }
        self.state = new_state;
        self.last_state_change = now;
        match new_state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }
}

/// Failure-isolation state machine for one endpoint.
///
/// All transitions happen under one mutex, so every record/transition is
/// atomic with respect to concurrent retry sequences on the same endpoint.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        let clock = Arc::new(clock);
        let now = clock.now();
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                last_state_change: now,
            }),
            clock,
        }
    }

    /// Whether an attempt may proceed right now.
    ///
    /// In the open state this lazily transitions to half-open once the
    /// cooldown has elapsed and permits the probe.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let cooled_down = match inner.last_failure {
                    Some(at) => now.duration_since(at) >= self.config.reset_timeout,
                    None => true,
                };
                if cooled_down {
                    inner.transition_to(CircuitState::HalfOpen, now);
                    info!("circuit breaker half-open, permitting probe attempt");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    let successes = inner.success_count;
                    inner.transition_to(CircuitState::Closed, self.clock.now());
                    info!("circuit breaker closed after {successes} probe successes");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_failure = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    inner.transition_to(CircuitState::Open, now);
                    warn!("circuit breaker opened after {failures} failures");
                }
            }
            CircuitState::HalfOpen => {
                inner.transition_to(CircuitState::Open, now);
                warn!("circuit breaker re-opened by probe failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Point-in-time status; `retry_after` is populated only while open.
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        let now = self.clock.now();
        let retry_after = match (inner.state, inner.last_failure) {
            (CircuitState::Open, Some(at)) => Some(
                self.config
                    .reset_timeout
                    .saturating_sub(now.duration_since(at)),
            ),
            (CircuitState::Open, None) => Some(Duration::ZERO),
            _ => None,
        };
        CircuitBreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            retry_after,
            since_state_change: now.duration_since(inner.last_state_change),
        }
    }

    /// Administrative override: force closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition_to(CircuitState::Closed, self.clock.now());
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
    }

    /// Administrative override: force open, cooldown starting now.
    pub fn trip(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.transition_to(CircuitState::Open, now);
        inner.last_failure = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn breaker(clock: &MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .success_threshold(2)
            .reset_timeout(Duration::from_secs(30))
            .build()
            .expect("valid config");
        CircuitBreaker::with_clock(config, clock.clone())
    }

    /// Validates exactly `failure_threshold` closed-state failures open the
    /// circuit.
    #[test]
    fn test_opens_at_failure_threshold() {
        let clock = MockClock::new();
        let breaker = breaker(&clock);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_attempt());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_attempt());
    }

    /// Validates a closed-state success resets the failure count.
    #[test]
    fn test_closed_success_resets_failures() {
        let clock = MockClock::new();
        let breaker = breaker(&clock);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.status().failure_count, 0);

        // The streak starts over, so two more failures do not open it.
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Validates the open -> half-open -> closed recovery path.
    #[test]
    fn test_recovery_path() {
        let clock = MockClock::new();
        let breaker = breaker(&clock);
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.can_attempt());

        // Cooldown not yet elapsed.
        clock.advance(Duration::from_secs(29));
        assert!(!breaker.can_attempt());

        // Cooldown elapsed: exactly one lazy transition to half-open.
        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
        assert_eq!(breaker.status().success_count, 0);
    }

    /// Validates any half-open failure re-opens immediately.
    #[test]
    fn test_half_open_failure_reopens() {
        let clock = MockClock::new();
        let breaker = breaker(&clock);
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        assert!(breaker.can_attempt());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_attempt());
    }

    /// Validates `status` exposes the remaining cooldown only while open.
    #[test]
    fn test_status_cooldown() {
        let clock = MockClock::new();
        let breaker = breaker(&clock);
        assert_eq!(breaker.status().retry_after, None);

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.status().retry_after, Some(Duration::from_secs(30)));

        clock.advance(Duration::from_secs(10));
        assert_eq!(breaker.status().retry_after, Some(Duration::from_secs(20)));

        clock.advance(Duration::from_secs(40));
        assert_eq!(breaker.status().retry_after, Some(Duration::ZERO));
    }

    /// Validates the administrative overrides.
    #[test]
    fn test_reset_and_trip() {
        let clock = MockClock::new();
        let breaker = breaker(&clock);

        breaker.trip();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.status().retry_after, Some(Duration::from_secs(30)));

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().failure_count, 0);
        assert!(breaker.can_attempt());
    }

    /// Validates success in the open state is a no-op.
    #[test]
    fn test_open_ignores_success() {
        let clock = MockClock::new();
        let breaker = breaker(&clock);
        for _ in 0..3 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
