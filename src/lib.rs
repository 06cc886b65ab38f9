//! Adaptive retry engine with per-endpoint learning.
//!
//! Unlike fixed exponential backoff, this crate learns how each endpoint
//! actually behaves and schedules retries accordingly:
//!
//! - **Statistics model** ([`StatsCollector`]): hour-of-day success rates
//!   (exponential moving average), observed recovery latencies, and
//!   empirical outcomes of consecutive-failure streaks, per endpoint.
//! - **Delay calculator** ([`DelayCalculator`]): composes a category-weighted
//!   base delay with the learned signals, blends toward the observed
//!   recovery percentile, jitters, and clamps.
//! - **Circuit breaker** ([`CircuitBreaker`]): per-endpoint failure
//!   isolation with a closed / open / half-open state machine.
//! - **Executor** ([`RetryExecutor`]): ties the three together around your
//!   async operation, with per-attempt timeouts and pluggable error
//!   classification.
//!
//! Statistics optionally persist across restarts through a
//! [`StorageAdapter`].
//!
//! # Example
//!
//! ```
//! use adaptive_retry::{RetryExecutor, RetryOptions};
//!
//! # #[derive(Debug, thiserror::Error)]
//! # #[error("service unavailable")]
//! # struct ServiceError;
//! # async fn call_service() -> Result<String, ServiceError> { Ok("ok".into()) }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let executor = RetryExecutor::new();
//! let outcome = executor
//!     .execute(
//!         || call_service(),
//!         RetryOptions::new("payments-api").max_retries(3),
//!     )
//!     .await
//!     .expect("service call failed");
//! assert_eq!(outcome.attempts, 1);
//! # }
//! ```

pub mod calculator;
pub mod circuit_breaker;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod stats;
pub mod storage;

pub use calculator::{DelayCalculator, DelayDecision, DelayFactors};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStatus, CircuitState};
pub use classifier::{
    classify_message, classify_status, Classifier, DefaultClassifier, ErrorCategory,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    AdaptiveConfig, AdaptiveConfigBuilder, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    ConfigError, ConfigResult,
};
pub use error::{AttemptError, BoxedError, RetryError};
pub use executor::{
    RetryEvent, RetryExecutor, RetryExecutorBuilder, RetryObserver, RetryOptions, RetryOutcome,
};
pub use stats::{EndpointStats, StatsCollector, StreakTally};
pub use storage::{MemoryStorage, StatsSnapshot, StorageAdapter, StorageResult};
