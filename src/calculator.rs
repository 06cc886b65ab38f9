//! Adaptive delay calculation
//!
//! Pure composition of signals: the error category sets a weighted baseline,
//! the learned time-of-day factor and streak penalty scale it
//! multiplicatively, and the observed recovery latency pulls the result
//! toward real-world behavior. Jitter decorrelates concurrent clients; the
//! final delay is always clamped to the configured window.

use rand::Rng;
use std::time::Duration;

use crate::classifier::ErrorCategory;
use crate::clock::Clock;
use crate::config::AdaptiveConfig;
use crate::stats::StatsCollector;

/// Blend weight applied to the computed delay when recovery history exists;
/// the complement goes to the recovery estimate.
const CALCULATED_BLEND: f64 = 0.4;
const RECOVERY_BLEND: f64 = 0.6;

/// The independent signals behind one delay decision.
///
/// Transient and observational only; nothing here is persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayFactors {
    /// Static severity weight of the error category.
    pub error_weight: f64,
    /// Learned hour-of-day slowdown factor, `[0.5, 3.0]` or neutral 1.0.
    pub time_of_day_factor: f64,
    /// p75 of observed recovery latencies in millis (0 disables blending).
    pub recovery_estimate: f64,
    /// Estimated probability that the next attempt succeeds.
    pub success_probability: f64,
    /// Bounded geometric penalty for deep attempt numbers.
    pub streak_penalty: f64,
}

impl DelayFactors {
    /// Factors reported for the PERMANENT short-circuit, where nothing is
    /// computed.
    fn empty() -> Self {
        Self {
            error_weight: 0.0,
            time_of_day_factor: 1.0,
            recovery_estimate: 0.0,
            success_probability: 0.0,
            streak_penalty: 1.0,
        }
    }
}

/// Verdict of one delay calculation.
#[derive(Debug, Clone, Copy)]
pub struct DelayDecision {
    /// How long to wait before the next attempt. Zero when not retrying.
    pub delay: Duration,
    /// Whether another attempt should be made at all.
    pub should_retry: bool,
    /// The signals that produced this decision, for observability.
    pub factors: DelayFactors,
}

/// Turns (category, attempt number, learned statistics) into a concrete
/// wait time and retry verdict.
#[derive(Debug, Clone)]
pub struct DelayCalculator {
    config: AdaptiveConfig,
}

impl DelayCalculator {
    /// Create a calculator over the given tuning.
    pub fn new(config: AdaptiveConfig) -> Self {
        Self { config }
    }

    /// The tuning in effect.
    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Compute the retry verdict for a failure.
    ///
    /// PERMANENT failures short-circuit to "do not retry". Otherwise the
    /// learned success probability can veto further retries (futility
    /// cutoff, distinct from the static PERMANENT classification) before the
    /// multiplicative delay composition runs.
    pub fn calculate<C: Clock>(
        &self,
        category: ErrorCategory,
        attempt: u32,
        stats: &StatsCollector<C>,
        endpoint: &str,
    ) -> DelayDecision {
        if category == ErrorCategory::Permanent {
            return DelayDecision {
                delay: Duration::ZERO,
                should_retry: false,
                factors: DelayFactors::empty(),
            };
        }

        let factors = self.compute_factors(category, attempt, stats, endpoint);
        if factors.success_probability < self.config.min_success_probability {
            return DelayDecision { delay: Duration::ZERO, should_retry: false, factors };
        }

        let mut delay = self.config.base_delays.get(category)
            * factors.error_weight
            * factors.time_of_day_factor
            * factors.streak_penalty;

        // Anchor theoretical backoff to observed recovery behavior.
        if factors.recovery_estimate > 0.0 {
            delay = delay * CALCULATED_BLEND + factors.recovery_estimate * RECOVERY_BLEND;
        }

        let jitter = delay * self.config.jitter_percent * rand::thread_rng().gen_range(-1.0..=1.0);
        delay += jitter;

        let delay = delay.clamp(
            self.config.min_delay.as_millis() as f64,
            self.config.max_delay.as_millis() as f64,
        );

        DelayDecision {
            delay: Duration::from_millis(delay.round() as u64),
            should_retry: true,
            factors,
        }
    }

    fn compute_factors<C: Clock>(
        &self,
        category: ErrorCategory,
        attempt: u32,
        stats: &StatsCollector<C>,
        endpoint: &str,
    ) -> DelayFactors {
        let streak_penalty = self
            .config
            .streak_base
            .powi(attempt.saturating_sub(1) as i32)
            .min(self.config.max_streak_penalty);
        DelayFactors {
            error_weight: self.config.error_weights.get(category),
            time_of_day_factor: stats.time_of_day_factor(endpoint),
            recovery_estimate: stats.recovery_estimate(endpoint),
            success_probability: stats.success_probability(endpoint, attempt),
            streak_penalty,
        }
    }
}
