//! Retry orchestration
//!
//! [`RetryExecutor`] composes the statistics model, the delay calculator and
//! the per-endpoint circuit breakers under one retry loop: gate on the
//! breaker, run the operation under a bounded timeout, classify the failure,
//! update statistics and breaker, ask the calculator for a wait, and either
//! suspend or give up. Construct one executor per host application and pass
//! it to call sites; there is no hidden global instance.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use crate::calculator::{DelayCalculator, DelayFactors};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStatus};
use crate::classifier::{Classifier, DefaultClassifier, ErrorCategory};
use crate::clock::{Clock, SystemClock};
use crate::config::{AdaptiveConfig, CircuitBreakerConfig, ConfigResult};
use crate::error::{AttemptError, RetryError};
use crate::stats::{EndpointStats, StatsCollector};
use crate::storage::StorageAdapter;

/// Default attempt budget per call.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default per-attempt timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Diagnostics handed to a [`RetryObserver`] before each wait.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// Endpoint being retried.
    pub endpoint: String,
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    /// How long the executor will wait before the next attempt.
    pub delay: Duration,
    /// Category of the failure.
    pub category: ErrorCategory,
    /// Estimated probability that the next attempt succeeds.
    pub success_probability: f64,
    /// The full factor breakdown behind the delay.
    pub factors: DelayFactors,
    /// Rendered failure message.
    pub error: String,
}

/// Callback receiving per-retry diagnostics.
pub trait RetryObserver: Send + Sync {
    /// Called after a failed attempt, before the inter-attempt wait.
    fn on_retry(&self, event: &RetryEvent);
}

impl<F> RetryObserver for F
where
    F: Fn(&RetryEvent) + Send + Sync,
{
    fn on_retry(&self, event: &RetryEvent) {
        self(event)
    }
}

/// Successful result of a retry sequence.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The operation's value.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Elapsed time from the first attempt to the success.
    pub total_time: Duration,
    /// Endpoint the sequence ran against.
    pub endpoint: String,
}

/// Per-call options for [`RetryExecutor::execute`].
pub struct RetryOptions<E> {
    endpoint: String,
    max_retries: u32,
    timeout: Duration,
    use_circuit_breaker: Option<bool>,
    observer: Option<Arc<dyn RetryObserver>>,
    classifier: Option<Arc<dyn Classifier<E>>>,
}

impl<E> RetryOptions<E> {
    /// Options for `endpoint` with defaults: 5 attempts, 30 s per-attempt
    /// timeout, circuit breaking per the executor default.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            use_circuit_breaker: None,
            observer: None,
            classifier: None,
        }
    }

    /// Set the attempt budget (minimum 1).
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable circuit breaking for this call, overriding the
    /// executor default.
    pub fn use_circuit_breaker(mut self, enabled: bool) -> Self {
        self.use_circuit_breaker = Some(enabled);
        self
    }

    /// Attach a per-retry observer.
    pub fn observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Attach a custom failure classifier.
    pub fn classifier(mut self, classifier: Arc<dyn Classifier<E>>) -> Self {
        self.classifier = Some(classifier);
        self
    }
}

/// Builder for [`RetryExecutor`].
pub struct RetryExecutorBuilder<C: Clock = SystemClock> {
    config: AdaptiveConfig,
    breaker_config: CircuitBreakerConfig,
    use_circuit_breaker: bool,
    storage: Option<Arc<dyn StorageAdapter>>,
    clock: C,
}

impl Default for RetryExecutorBuilder<SystemClock> {
    fn default() -> Self {
        Self {
            config: AdaptiveConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            use_circuit_breaker: true,
            storage: None,
            clock: SystemClock,
        }
    }
}

impl RetryExecutorBuilder<SystemClock> {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> RetryExecutorBuilder<C> {
    /// Set the adaptive tuning.
    pub fn config(mut self, config: AdaptiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the circuit breaker thresholds.
    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Set the default for circuit breaking (on unless overridden per call).
    pub fn use_circuit_breaker(mut self, enabled: bool) -> Self {
        self.use_circuit_breaker = enabled;
        self
    }

    /// Attach a storage adapter for statistics persistence.
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Swap in a custom clock (useful for testing).
    pub fn clock<C2: Clock>(self, clock: C2) -> RetryExecutorBuilder<C2> {
        RetryExecutorBuilder {
            config: self.config,
            breaker_config: self.breaker_config,
            use_circuit_breaker: self.use_circuit_breaker,
            storage: self.storage,
            clock,
        }
    }

    /// Validate the configs and build the executor.
    pub fn build(self) -> ConfigResult<RetryExecutor<C>> {
        self.config.validate()?;
        self.breaker_config.validate()?;
        let clock = Arc::new(self.clock);
        let stats = Arc::new(StatsCollector::with_clock(
            self.config.clone(),
            self.storage,
            Arc::clone(&clock),
        ));
        Ok(RetryExecutor {
            stats,
            calculator: DelayCalculator::new(self.config),
            breakers: DashMap::new(),
            breaker_config: self.breaker_config,
            use_circuit_breaker: self.use_circuit_breaker,
            clock,
        })
    }
}

/// Adaptive retry engine with per-endpoint learning and failure isolation.
pub struct RetryExecutor<C: Clock = SystemClock> {
    stats: Arc<StatsCollector<Arc<C>>>,
    calculator: DelayCalculator,
    breakers: DashMap<String, Arc<CircuitBreaker<Arc<C>>>>,
    breaker_config: CircuitBreakerConfig,
    use_circuit_breaker: bool,
    clock: Arc<C>,
}

impl RetryExecutor<SystemClock> {
    /// Executor with default tuning, no persistence, system clock.
    pub fn new() -> Self {
        RetryExecutorBuilder::new()
            .build()
            .unwrap_or_else(|_| unreachable!("default configuration is valid"))
    }

    /// Create a builder.
    pub fn builder() -> RetryExecutorBuilder<SystemClock> {
        RetryExecutorBuilder::new()
    }
}

impl Default for RetryExecutor<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RetryExecutor<C> {
    /// Execute `operation` with adaptive retries.
    ///
    /// The operation is invoked once per attempt and must be safely
    /// re-invokable. Each attempt runs under the per-call timeout; a timeout
    /// counts as a failure classified [`ErrorCategory::Timeout`].
    #[instrument(
        skip(self, operation, options),
        fields(endpoint = %options.endpoint, max_retries = options.max_retries)
    )]
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut operation: F,
        options: RetryOptions<E>,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let endpoint = options.endpoint.clone();
        let started = self.clock.now();
        let breaker = options
            .use_circuit_breaker
            .unwrap_or(self.use_circuit_breaker)
            .then(|| self.breaker_for(&endpoint));

        for attempt in 1..=options.max_retries {
            if let Some(breaker) = &breaker {
                if !breaker.can_attempt() {
                    let retry_after =
                        breaker.status().retry_after.unwrap_or(Duration::ZERO);
                    debug!(%endpoint, ?retry_after, "circuit open, failing fast");
                    return Err(RetryError::CircuitOpen { endpoint, retry_after });
                }
            }

            let failure = match tokio::time::timeout(options.timeout, operation()).await {
                Ok(Ok(value)) => {
                    let total_time = self.clock.now().duration_since(started);
                    let recovery_time =
                        (attempt > 1).then(|| total_time.as_millis() as u64);
                    self.stats.record_success(&endpoint, attempt, recovery_time);
                    if let Some(breaker) = &breaker {
                        breaker.record_success();
                    }
                    if attempt > 1 {
                        debug!(%endpoint, attempt, "operation recovered");
                    }
                    return Ok(RetryOutcome { value, attempts: attempt, total_time, endpoint });
                }
                Ok(Err(error)) => AttemptError::Operation(error),
                Err(_) => AttemptError::TimedOut { limit: options.timeout },
            };

            let category = match &failure {
                AttemptError::TimedOut { .. } => ErrorCategory::Timeout,
                AttemptError::Operation(error) => match &options.classifier {
                    Some(classifier) => classifier.classify(error),
                    None => DefaultClassifier.classify(error),
                },
            };

            self.stats.record_failure(&endpoint, category);
            if let Some(breaker) = &breaker {
                breaker.record_failure();
            }

            let decision =
                self.calculator.calculate(category, attempt, &self.stats, &endpoint);

            if !decision.should_retry || attempt == options.max_retries {
                self.stats.record_exhausted(&endpoint);
                warn!(%endpoint, attempt, %category, "giving up: {failure}");
                return Err(if decision.should_retry {
                    RetryError::Exhausted { attempts: attempt, source: failure }
                } else {
                    RetryError::Rejected { attempts: attempt, category, source: failure }
                });
            }

            if let Some(observer) = &options.observer {
                observer.on_retry(&RetryEvent {
                    endpoint: endpoint.clone(),
                    attempt,
                    delay: decision.delay,
                    category,
                    success_probability: decision.factors.success_probability,
                    factors: decision.factors,
                    error: failure.to_string(),
                });
            }

            debug!(%endpoint, attempt, %category, delay = ?decision.delay, "retrying");
            tokio::time::sleep(decision.delay).await;
        }

        unreachable!("loop returns on success, veto, or exhaustion")
    }

    /// Learned statistics for one endpoint, if any.
    pub fn stats(&self, endpoint: &str) -> Option<EndpointStats> {
        self.stats.stats(endpoint)
    }

    /// All endpoints with recorded statistics.
    pub fn tracked_endpoints(&self) -> Vec<String> {
        self.stats.endpoints()
    }

    /// Status of an endpoint's breaker, if one exists yet.
    pub fn circuit_breaker_status(&self, endpoint: &str) -> Option<CircuitBreakerStatus> {
        self.breakers.get(endpoint).map(|breaker| breaker.status())
    }

    /// Force an endpoint's breaker closed. No-op when none exists.
    pub fn reset_circuit_breaker(&self, endpoint: &str) {
        if let Some(breaker) = self.breakers.get(endpoint) {
            breaker.reset();
        }
    }

    /// Force an endpoint's breaker open (creating it if needed), cooldown
    /// starting now.
    pub fn trip_circuit_breaker(&self, endpoint: &str) {
        self.breaker_for(endpoint).trip();
    }

    /// Drop all learned statistics and breakers, deleting persisted rows
    /// best-effort.
    pub async fn clear_all(&self) {
        self.stats.clear_all().await;
        self.breakers.clear();
    }

    /// Restore persisted statistics into memory.
    pub async fn load_from_storage(&self) {
        self.stats.load_from_storage().await;
    }

    fn breaker_for(&self, endpoint: &str) -> Arc<CircuitBreaker<Arc<C>>> {
        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_clock(
                    self.breaker_config.clone(),
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }
}
