//! Time abstraction for deterministic testing
//!
//! All time-dependent behavior in this crate (circuit breaker cooldowns,
//! hour-of-day statistics buckets, recovery timestamps) goes through the
//! [`Clock`] trait so it can be driven by [`SystemClock`] in production and
//! [`MockClock`] in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Timelike;

/// Trait for time operations to enable deterministic testing.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time).
    fn now(&self) -> Instant;

    /// Get current system time (wall clock).
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch.
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }

    /// Get the local hour of day in `0..24`, used for statistics bucketing.
    fn hour_of_day(&self) -> usize {
        chrono::Local::now().hour() as usize
    }
}

/// Real system clock implementation for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient cloning.
impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }

    fn hour_of_day(&self) -> usize {
        (**self).hour_of_day()
    }
}

/// Mock clock for deterministic testing.
///
/// Allows tests to control time progression and the hour-of-day bucket
/// without actual delays.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
    hour: Arc<AtomicUsize>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant, hour 0.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            hour: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Advance the mock clock by a duration.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Advance the mock clock by milliseconds (convenience method).
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Pin the reported hour of day to `hour % 24`.
    pub fn set_hour(&self, hour: usize) {
        self.hour.store(hour % 24, Ordering::Relaxed);
    }

    /// Get the current elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.elapsed()
    }

    fn hour_of_day(&self) -> usize {
        self.hour.load(Ordering::Relaxed)
    }
}
