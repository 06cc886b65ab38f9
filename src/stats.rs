//! Per-endpoint learned behavior
//!
//! This is the heart of the adaptive scheduler. For every endpoint it tracks
//! hour-of-day success rates (exponential moving average with an adaptive
//! learning rate), observed recovery latencies, and empirical outcomes of
//! consecutive-failure streaks. The delay calculator queries these signals;
//! the executor feeds them.
//!
//! All mutations on one endpoint are atomic: the record lives in a
//! [`DashMap`] entry that is held for the whole update. Mutations also
//! schedule a debounced, best-effort write of the endpoint snapshot to the
//! optional [`StorageAdapter`]; a burst of updates inside the debounce
//! window collapses into a single write.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::ErrorCategory;
use crate::clock::{Clock, SystemClock};
use crate::config::AdaptiveConfig;
use crate::storage::{StatsSnapshot, StorageAdapter};

/// Streak-outcome buckets are clamped to `1..=MAX_STREAK_BUCKET`.
pub const MAX_STREAK_BUCKET: u32 = 10;

/// Minimum empirical samples in a streak bucket before the tally overrides
/// the geometric prior.
const MIN_STREAK_SAMPLES: u64 = 5;

/// Minimum attempts recorded in an hour bucket before its rate is trusted.
const MIN_HOURLY_ATTEMPTS: u64 = 10;

/// Prior recovery time (milliseconds) used while no history exists.
const DEFAULT_RECOVERY_MS: f64 = 1000.0;

/// Per-attempt success prior for the geometric fallback probability.
const SUCCESS_PRIOR: f64 = 0.7;

/// How long mutations are debounced before the snapshot is persisted.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Empirical outcome tally for one streak-length bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakTally {
    /// Streaks of this length that ended in a success.
    pub succeeded: u64,
    /// Streaks of this length that ended in total exhaustion.
    pub failed: u64,
}

impl StreakTally {
    /// Combined sample count in this bucket.
    pub fn samples(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Learned statistics for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointStats {
    /// The endpoint identifier these statistics belong to.
    pub endpoint: String,
    /// Recent first-attempt-to-success latencies (millis), oldest first.
    pub recent_recovery_times: VecDeque<u64>,
    /// Arithmetic mean of `recent_recovery_times`, 1000 ms prior when empty.
    pub avg_recovery_time: f64,
    /// EMA success rate per hour of day, neutral 0.5 prior.
    pub hourly_success_rate: [f64; 24],
    /// Attempts observed per hour of day. Never reset; gates confidence.
    pub hourly_attempts: [u64; 24],
    /// Empirical streak outcomes keyed by clamped streak length.
    pub streak_outcomes: HashMap<u32, StreakTally>,
    /// Epoch millis of the most recent failure.
    pub last_failure_time: Option<u64>,
    /// Epoch millis of the most recent success.
    pub last_success_time: Option<u64>,
    /// Length of the currently running failure streak.
    pub consecutive_failures: u32,
    /// Failure tallies per category.
    pub error_category_counts: HashMap<ErrorCategory, u64>,
}

impl EndpointStats {
    /// Create a fresh record with neutral priors.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            recent_recovery_times: VecDeque::new(),
            avg_recovery_time: DEFAULT_RECOVERY_MS,
            hourly_success_rate: [0.5; 24],
            hourly_attempts: [0; 24],
            streak_outcomes: HashMap::new(),
            last_failure_time: None,
            last_success_time: None,
            consecutive_failures: 0,
            error_category_counts: ErrorCategory::ALL.iter().map(|c| (*c, 0)).collect(),
        }
    }

    fn record_streak_outcome(&mut self, streak: u32, succeeded: bool) {
        let bucket = streak.clamp(1, MAX_STREAK_BUCKET);
        let tally = self.streak_outcomes.entry(bucket).or_default();
        if succeeded {
            tally.succeeded += 1;
        } else {
            tally.failed += 1;
        }
    }
}

/// EMA update with an adaptive learning rate.
///
/// Early samples dominate (`alpha` near 1), long-run volatility is bounded
/// (`alpha` capped at 0.3). `attempts` is the count before this sample.
fn update_rate(current_rate: f64, attempts: u64, success: bool) -> f64 {
    let alpha = (1.0 / (attempts as f64 + 1.0)).min(0.3);
    let outcome = if success { 1.0 } else { 0.0 };
    current_rate * (1.0 - alpha) + outcome * alpha
}

/// Registry of [`EndpointStats`] with atomic per-endpoint updates and
/// debounced persistence.
pub struct StatsCollector<C: Clock = SystemClock> {
    stats: Arc<DashMap<String, EndpointStats>>,
    config: AdaptiveConfig,
    storage: Option<Arc<dyn StorageAdapter>>,
    pending_saves: Arc<DashSet<String>>,
    save_debounce: Duration,
    clock: Arc<C>,
}

impl StatsCollector<SystemClock> {
    /// Create a collector with no persistence, on the system clock.
    pub fn new(config: AdaptiveConfig) -> Self {
        Self::with_clock(config, None, SystemClock)
    }

    /// Create a collector backed by a storage adapter.
    pub fn with_storage(config: AdaptiveConfig, storage: Arc<dyn StorageAdapter>) -> Self {
        Self::with_clock(config, Some(storage), SystemClock)
    }
}

impl<C: Clock> StatsCollector<C> {
    /// Create a collector with a custom clock (useful for testing).
    pub fn with_clock(
        config: AdaptiveConfig,
        storage: Option<Arc<dyn StorageAdapter>>,
        clock: C,
    ) -> Self {
        Self {
            stats: Arc::new(DashMap::new()),
            config,
            storage,
            pending_saves: Arc::new(DashSet::new()),
            save_debounce: SAVE_DEBOUNCE,
            clock: Arc::new(clock),
        }
    }

    /// Record a successful attempt.
    ///
    /// `recovery_time` is the elapsed millis from the first attempt of the
    /// sequence and only counts toward the recovery history when the success
    /// took more than one attempt. An active failure streak is closed out as
    /// a "succeeded" empirical outcome.
    pub fn record_success(&self, endpoint: &str, attempt: u32, recovery_time: Option<u64>) {
        let hour = self.clock.hour_of_day();
        let now = self.clock.millis_since_epoch();
        {
            let mut entry = self
                .stats
                .entry(endpoint.to_string())
                .or_insert_with(|| EndpointStats::new(endpoint));
            let stat = entry.value_mut();

            stat.hourly_success_rate[hour] =
                update_rate(stat.hourly_success_rate[hour], stat.hourly_attempts[hour], true);
            stat.hourly_attempts[hour] += 1;

            if let Some(recovery) = recovery_time {
                if attempt > 1 {
                    stat.recent_recovery_times.push_back(recovery);
                    while stat.recent_recovery_times.len() > self.config.max_history_samples {
                        stat.recent_recovery_times.pop_front();
                    }
                    let len = stat.recent_recovery_times.len() as f64;
                    stat.avg_recovery_time =
                        stat.recent_recovery_times.iter().sum::<u64>() as f64 / len;
                }
            }

            if stat.consecutive_failures > 0 {
                let streak = stat.consecutive_failures;
                stat.record_streak_outcome(streak, true);
            }
            stat.last_success_time = Some(now);
            stat.consecutive_failures = 0;
        }
        self.schedule_save(endpoint);
    }

    /// Record a failed attempt of the given category.
    pub fn record_failure(&self, endpoint: &str, category: ErrorCategory) {
        let hour = self.clock.hour_of_day();
        let now = self.clock.millis_since_epoch();
        {
            let mut entry = self
                .stats
                .entry(endpoint.to_string())
                .or_insert_with(|| EndpointStats::new(endpoint));
            let stat = entry.value_mut();

            stat.hourly_success_rate[hour] =
                update_rate(stat.hourly_success_rate[hour], stat.hourly_attempts[hour], false);
            stat.hourly_attempts[hour] += 1;
            *stat.error_category_counts.entry(category).or_insert(0) += 1;
            stat.consecutive_failures += 1;
            stat.last_failure_time = Some(now);
        }
        self.schedule_save(endpoint);
    }

    /// Record that a retry sequence gave up with a failure streak active.
    ///
    /// Captures how often a streak of length N ends in total failure.
    pub fn record_exhausted(&self, endpoint: &str) {
        {
            let mut entry = self
                .stats
                .entry(endpoint.to_string())
                .or_insert_with(|| EndpointStats::new(endpoint));
            let stat = entry.value_mut();
            if stat.consecutive_failures > 0 {
                let streak = stat.consecutive_failures;
                stat.record_streak_outcome(streak, false);
            }
        }
        self.schedule_save(endpoint);
    }

    /// Empirical probability that the next attempt succeeds.
    ///
    /// Uses the streak-outcome tally for `min(attempt, 10)` when it holds at
    /// least 5 samples, else the geometric prior `0.7^(attempt - 1)`.
    pub fn success_probability(&self, endpoint: &str, attempt: u32) -> f64 {
        let prior = SUCCESS_PRIOR.powi(attempt.saturating_sub(1) as i32);
        let Some(stat) = self.stats.get(endpoint) else {
            return prior;
        };
        let bucket = attempt.min(MAX_STREAK_BUCKET);
        match stat.streak_outcomes.get(&bucket) {
            Some(tally) if tally.samples() >= MIN_STREAK_SAMPLES => {
                tally.succeeded as f64 / tally.samples() as f64
            }
            _ => prior,
        }
    }

    /// Hour-of-day slowdown factor in `[0.5, 3.0]`.
    ///
    /// Neutral 1.0 until the current hour has 10 recorded attempts. A
    /// near-zero hourly rate yields the maximum 3.0 penalty; otherwise the
    /// ratio of the 24-hour average rate to this hour's rate, clamped.
    pub fn time_of_day_factor(&self, endpoint: &str) -> f64 {
        let Some(stat) = self.stats.get(endpoint) else {
            return 1.0;
        };
        let hour = self.clock.hour_of_day();
        if stat.hourly_attempts[hour] < MIN_HOURLY_ATTEMPTS {
            return 1.0;
        }
        let hourly_rate = stat.hourly_success_rate[hour];
        if hourly_rate <= 0.01 {
            return 3.0;
        }
        let avg_rate = stat.hourly_success_rate.iter().sum::<f64>() / 24.0;
        (avg_rate / hourly_rate).clamp(0.5, 3.0)
    }

    /// 75th percentile of observed recovery times in millis, 1000 ms prior
    /// when no history exists.
    pub fn recovery_estimate(&self, endpoint: &str) -> f64 {
        let Some(stat) = self.stats.get(endpoint) else {
            return DEFAULT_RECOVERY_MS;
        };
        if stat.recent_recovery_times.is_empty() {
            return DEFAULT_RECOVERY_MS;
        }
        let mut sorted: Vec<u64> = stat.recent_recovery_times.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() as f64 * 0.75).floor() as usize;
        sorted[index.min(sorted.len() - 1)] as f64
    }

    /// Snapshot of one endpoint's statistics. Query-only.
    pub fn stats(&self, endpoint: &str) -> Option<EndpointStats> {
        self.stats.get(endpoint).map(|entry| entry.value().clone())
    }

    /// All endpoints with recorded statistics. Query-only.
    pub fn endpoints(&self) -> Vec<String> {
        self.stats.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop one endpoint's learned state, deleting its persisted row
    /// best-effort.
    pub async fn clear(&self, endpoint: &str) {
        self.stats.remove(endpoint);
        self.pending_saves.remove(endpoint);
        if let Some(storage) = &self.storage {
            if let Err(error) = storage.delete(endpoint).await {
                warn!(%endpoint, %error, "failed to delete persisted statistics");
            }
        }
    }

    /// Drop all learned state, deleting persisted rows best-effort.
    pub async fn clear_all(&self) {
        let endpoints = self.endpoints();
        self.stats.clear();
        self.pending_saves.clear();
        if let Some(storage) = &self.storage {
            for endpoint in endpoints {
                if let Err(error) = storage.delete(&endpoint).await {
                    warn!(%endpoint, %error, "failed to delete persisted statistics");
                }
            }
        }
    }

    /// Load every persisted snapshot back into memory.
    ///
    /// Rebuilds the numeric streak buckets from their string-keyed wire
    /// form. Adapter errors are logged and skipped; loading never fails the
    /// caller.
    pub async fn load_from_storage(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let keys = match storage.list_keys().await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(%error, "failed to list persisted statistics keys");
                return;
            }
        };
        for key in keys {
            match storage.get(&key).await {
                Ok(Some(snapshot)) => {
                    debug!(endpoint = %key, "restored endpoint statistics");
                    self.stats.insert(key.clone(), snapshot.into_stats(&key));
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(endpoint = %key, %error, "failed to load persisted statistics");
                }
            }
        }
    }

    /// Schedule a debounced snapshot write for `endpoint`.
    ///
    /// The first mutation in a window arms a timer; mutations while the
    /// timer is armed piggyback on the same write. Requires a tokio runtime
    /// only when a storage adapter is configured.
    fn schedule_save(&self, endpoint: &str) {
        let Some(storage) = self.storage.clone() else {
            return;
        };
        if !self.pending_saves.insert(endpoint.to_string()) {
            return;
        }
        let pending = Arc::clone(&self.pending_saves);
        let stats = Arc::clone(&self.stats);
        let endpoint = endpoint.to_string();
        let debounce = self.save_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if pending.remove(&endpoint).is_none() {
                return;
            }
            let snapshot = stats.get(&endpoint).map(|entry| StatsSnapshot::from(entry.value()));
            if let Some(snapshot) = snapshot {
                if let Err(error) = storage.set(&endpoint, snapshot).await {
                    warn!(%endpoint, %error, "failed to persist endpoint statistics");
                }
            }
        });
    }
}
