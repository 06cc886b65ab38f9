//! Tuning configuration for the adaptive retry engine
//!
//! Two independent configs live here: [`AdaptiveConfig`] drives the delay
//! calculator and the statistics model, [`CircuitBreakerConfig`] drives the
//! per-endpoint failure isolation. Both follow the builder-with-validation
//! pattern and ship conservative defaults.

use std::time::Duration;

use thiserror::Error;

use crate::classifier::ErrorCategory;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What was wrong.
        message: String,
    },
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// One `f64` value per [`ErrorCategory`].
///
/// Used for both per-category base delays (in milliseconds) and per-category
/// severity weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryTable {
    /// Value for [`ErrorCategory::Transient`].
    pub transient: f64,
    /// Value for [`ErrorCategory::Overload`].
    pub overload: f64,
    /// Value for [`ErrorCategory::Timeout`].
    pub timeout: f64,
    /// Value for [`ErrorCategory::Permanent`].
    pub permanent: f64,
    /// Value for [`ErrorCategory::Unknown`].
    pub unknown: f64,
}

impl CategoryTable {
    /// Look up the value for a category.
    pub fn get(&self, category: ErrorCategory) -> f64 {
        match category {
            ErrorCategory::Transient => self.transient,
            ErrorCategory::Overload => self.overload,
            ErrorCategory::Timeout => self.timeout,
            ErrorCategory::Permanent => self.permanent,
            ErrorCategory::Unknown => self.unknown,
        }
    }

    /// Replace the value for a category.
    pub fn set(&mut self, category: ErrorCategory, value: f64) {
        match category {
            ErrorCategory::Transient => self.transient = value,
            ErrorCategory::Overload => self.overload = value,
            ErrorCategory::Timeout => self.timeout = value,
            ErrorCategory::Permanent => self.permanent = value,
            ErrorCategory::Unknown => self.unknown = value,
        }
    }
}

/// Tuning knobs for the delay calculator and statistics model.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Per-category base delay in milliseconds.
    pub base_delays: CategoryTable,
    /// Per-category severity weight multiplying the base delay.
    pub error_weights: CategoryTable,
    /// Geometric base for the consecutive-failure streak penalty.
    pub streak_base: f64,
    /// Upper bound on the streak penalty factor.
    pub max_streak_penalty: f64,
    /// Symmetric jitter amplitude as a fraction of the computed delay.
    pub jitter_percent: f64,
    /// Lower clamp for any computed delay.
    pub min_delay: Duration,
    /// Upper clamp for any computed delay.
    pub max_delay: Duration,
    /// Learned-futility floor: below this success probability, stop retrying.
    pub min_success_probability: f64,
    /// Cap on the per-endpoint recovery-time history.
    pub max_history_samples: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            base_delays: CategoryTable {
                transient: 100.0,
                overload: 1000.0,
                timeout: 500.0,
                permanent: 0.0,
                unknown: 300.0,
            },
            error_weights: CategoryTable {
                transient: 1.0,
                overload: 3.0,
                timeout: 1.5,
                permanent: 0.0,
                unknown: 2.0,
            },
            streak_base: 1.5,
            max_streak_penalty: 10.0,
            jitter_percent: 0.2,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(30),
            min_success_probability: 0.1,
            max_history_samples: 100,
        }
    }
}

impl AdaptiveConfig {
    /// Create a configuration builder.
    pub fn builder() -> AdaptiveConfigBuilder {
        AdaptiveConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.streak_base < 1.0 {
            return Err(ConfigError::Invalid {
                message: "streak_base must be at least 1.0".to_string(),
            });
        }
        if self.max_streak_penalty < 1.0 {
            return Err(ConfigError::Invalid {
                message: "max_streak_penalty must be at least 1.0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ConfigError::Invalid {
                message: "jitter_percent must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::Invalid {
                message: "min_delay must not exceed max_delay".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_success_probability) {
            return Err(ConfigError::Invalid {
                message: "min_success_probability must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.max_history_samples == 0 {
            return Err(ConfigError::Invalid {
                message: "max_history_samples must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`AdaptiveConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct AdaptiveConfigBuilder {
    config: AdaptiveConfig,
}

impl AdaptiveConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: AdaptiveConfig::default() }
    }

    /// Override the base delay for one category.
    pub fn base_delay(mut self, category: ErrorCategory, delay: Duration) -> Self {
        self.config.base_delays.set(category, delay.as_millis() as f64);
        self
    }

    /// Override the severity weight for one category.
    pub fn error_weight(mut self, category: ErrorCategory, weight: f64) -> Self {
        self.config.error_weights.set(category, weight);
        self
    }

    /// Set the streak penalty geometric base.
    pub fn streak_base(mut self, base: f64) -> Self {
        self.config.streak_base = base;
        self
    }

    /// Set the streak penalty cap.
    pub fn max_streak_penalty(mut self, penalty: f64) -> Self {
        self.config.max_streak_penalty = penalty;
        self
    }

    /// Set the jitter amplitude (fraction of the delay, symmetric).
    pub fn jitter_percent(mut self, percent: f64) -> Self {
        self.config.jitter_percent = percent;
        self
    }

    /// Set the lower delay clamp.
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.config.min_delay = delay;
        self
    }

    /// Set the upper delay clamp.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set the learned-futility probability floor.
    pub fn min_success_probability(mut self, probability: f64) -> Self {
        self.config.min_success_probability = probability;
        self
    }

    /// Set the recovery-history cap.
    pub fn max_history_samples(mut self, samples: usize) -> Self {
        self.config.max_history_samples = samples;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> ConfigResult<AdaptiveConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration for the per-endpoint circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive closed-state failures before opening the circuit.
    pub failure_threshold: u32,
    /// Half-open successes required to close the circuit again.
    pub success_threshold: u32,
    /// Cooldown before an open circuit permits a probe attempt.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the half-open success threshold.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set the open-state cooldown.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
