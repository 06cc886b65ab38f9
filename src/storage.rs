//! Persistence contract for learned statistics
//!
//! Statistics survive process restarts through a pluggable
//! [`StorageAdapter`]. The engine only ever hands adapters a
//! [`StatsSnapshot`], the serde-friendly wire form of
//! [`EndpointStats`](crate::stats::EndpointStats): streak-outcome buckets
//! travel string-keyed (JSON object keys) and are rebuilt into numeric
//! buckets on load. Persistence is best-effort and observational; adapter
//! failures never propagate into the retry loop.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::classifier::ErrorCategory;
use crate::error::BoxedError;
use crate::stats::{EndpointStats, StreakTally};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, BoxedError>;

/// Key-value store for serialized endpoint statistics.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fetch the snapshot stored under `key`, if any.
    async fn get(&self, key: &str) -> StorageResult<Option<StatsSnapshot>>;

    /// Store `snapshot` under `key`, replacing any previous value.
    async fn set(&self, key: &str, snapshot: StatsSnapshot) -> StorageResult<()>;

    /// Delete the snapshot stored under `key`. Deleting a missing key is not
    /// an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List every stored key.
    async fn list_keys(&self) -> StorageResult<Vec<String>>;
}

/// Serialized form of one endpoint's statistics.
///
/// Field-for-field mirror of `EndpointStats` except `streak_outcomes`,
/// which is keyed by the streak bucket rendered as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Endpoint identifier the snapshot was taken for.
    pub endpoint: String,
    /// Recent recovery latencies in millis, oldest first.
    pub recent_recovery_times: Vec<u64>,
    /// Mean of `recent_recovery_times`.
    pub avg_recovery_time: f64,
    /// EMA success rate per hour of day.
    pub hourly_success_rate: [f64; 24],
    /// Attempt counters per hour of day.
    pub hourly_attempts: [u64; 24],
    /// Streak outcomes with string-rendered bucket keys.
    pub streak_outcomes: BTreeMap<String, StreakTally>,
    /// Epoch millis of the most recent failure.
    pub last_failure_time: Option<u64>,
    /// Epoch millis of the most recent success.
    pub last_success_time: Option<u64>,
    /// Length of the failure streak at snapshot time.
    pub consecutive_failures: u32,
    /// Failure tallies per category.
    pub error_category_counts: HashMap<ErrorCategory, u64>,
}

impl From<&EndpointStats> for StatsSnapshot {
    fn from(stats: &EndpointStats) -> Self {
        Self {
            endpoint: stats.endpoint.clone(),
            recent_recovery_times: stats.recent_recovery_times.iter().copied().collect(),
            avg_recovery_time: stats.avg_recovery_time,
            hourly_success_rate: stats.hourly_success_rate,
            hourly_attempts: stats.hourly_attempts,
            streak_outcomes: stats
                .streak_outcomes
                .iter()
                .map(|(bucket, tally)| (bucket.to_string(), *tally))
                .collect(),
            last_failure_time: stats.last_failure_time,
            last_success_time: stats.last_success_time,
            consecutive_failures: stats.consecutive_failures,
            error_category_counts: stats.error_category_counts.clone(),
        }
    }
}

impl StatsSnapshot {
    /// Rebuild the in-memory record, keyed under `endpoint`.
    ///
    /// Streak buckets that fail to parse as numbers are dropped rather than
    /// corrupting the tally structure.
    pub fn into_stats(self, endpoint: &str) -> EndpointStats {
        let mut stats = EndpointStats::new(endpoint);
        stats.recent_recovery_times = VecDeque::from(self.recent_recovery_times);
        stats.avg_recovery_time = self.avg_recovery_time;
        stats.hourly_success_rate = self.hourly_success_rate;
        stats.hourly_attempts = self.hourly_attempts;
        stats.streak_outcomes = self
            .streak_outcomes
            .into_iter()
            .filter_map(|(bucket, tally)| bucket.parse::<u32>().ok().map(|b| (b, tally)))
            .collect();
        stats.last_failure_time = self.last_failure_time;
        stats.last_success_time = self.last_success_time;
        stats.consecutive_failures = self.consecutive_failures;
        for (category, count) in self.error_category_counts {
            stats.error_category_counts.insert(category, count);
        }
        stats
    }
}

/// In-memory adapter, the reference implementation and test double.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, StatsSnapshot>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<StatsSnapshot>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, snapshot: StatsSnapshot) -> StorageResult<()> {
        self.entries.insert(key.to_string(), snapshot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stats() -> EndpointStats {
        let mut stats = EndpointStats::new("ep");
        stats.recent_recovery_times = VecDeque::from(vec![120, 340]);
        stats.avg_recovery_time = 230.0;
        stats.hourly_success_rate[9] = 0.85;
        stats.hourly_attempts[9] = 17;
        stats.streak_outcomes.insert(2, StreakTally { succeeded: 4, failed: 1 });
        stats.streak_outcomes.insert(7, StreakTally { succeeded: 0, failed: 3 });
        stats.last_failure_time = Some(1_000);
        stats.last_success_time = Some(2_000);
        stats.consecutive_failures = 1;
        stats.error_category_counts.insert(ErrorCategory::Overload, 5);
        stats
    }

    /// Validates the snapshot round-trip, including the string-keyed streak
    /// buckets coming back numeric.
    #[test]
    fn test_snapshot_round_trip() {
        let original = sample_stats();
        let snapshot = StatsSnapshot::from(&original);
        assert_eq!(snapshot.streak_outcomes.get("2").map(|t| t.succeeded), Some(4));

        let restored = snapshot.into_stats("ep");
        assert_eq!(restored.recent_recovery_times, original.recent_recovery_times);
        assert_eq!(restored.avg_recovery_time, original.avg_recovery_time);
        assert_eq!(restored.hourly_success_rate, original.hourly_success_rate);
        assert_eq!(restored.hourly_attempts, original.hourly_attempts);
        assert_eq!(restored.streak_outcomes, original.streak_outcomes);
        assert_eq!(restored.consecutive_failures, 1);
        assert_eq!(
            restored.error_category_counts.get(&ErrorCategory::Overload),
            Some(&5)
        );
    }

    /// Validates the JSON wire form keeps streak buckets as object keys.
    #[test]
    fn test_snapshot_json_wire_form() {
        let snapshot = StatsSnapshot::from(&sample_stats());
        let json = serde_json::to_value(&snapshot).expect("snapshot serializes");
        assert!(json["streak_outcomes"]["2"].is_object());
        assert_eq!(json["streak_outcomes"]["7"]["failed"], 3);
        assert_eq!(json["error_category_counts"]["OVERLOAD"], 5);

        let decoded: StatsSnapshot =
            serde_json::from_value(json).expect("snapshot deserializes");
        assert_eq!(decoded.consecutive_failures, 1);
    }

    /// Validates unparseable streak keys are dropped, not fatal.
    #[test]
    fn test_bad_streak_keys_dropped() {
        let mut snapshot = StatsSnapshot::from(&sample_stats());
        snapshot.streak_outcomes.insert("not-a-number".to_string(), StreakTally::default());
        let restored = snapshot.into_stats("ep");
        assert_eq!(restored.streak_outcomes.len(), 2);
    }

    /// Validates the in-memory adapter contract.
    #[tokio::test]
    async fn test_memory_storage_crud() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());
        assert!(storage.get("ep").await.expect("get works").is_none());

        storage.set("ep", StatsSnapshot::from(&sample_stats())).await.expect("set works");
        assert_eq!(storage.len(), 1);
        assert!(storage.get("ep").await.expect("get works").is_some());
        assert_eq!(storage.list_keys().await.expect("list works"), vec!["ep".to_string()]);

        storage.delete("ep").await.expect("delete works");
        storage.delete("ep").await.expect("deleting a missing key is fine");
        assert!(storage.is_empty());
    }
}
