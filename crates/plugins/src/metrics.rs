//! Per-plugin invocation statistics for guarded calls.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

#[cfg(feature = "metrics")]
use parlor_metrics::{counter, histogram, labels, plugins as plugin_metrics};

use crate::error::PluginError;

#[derive(Debug, Clone, Default)]
struct CallStats {
    invocations: u64,
    successes: u64,
    failures: u64,
    rejected: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Duration,
    last_error: Option<(SystemTime, String)>,
    last_invoked: Option<SystemTime>,
}

/// Aggregated statistics, either global or for one owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    /// Calls skipped because the circuit was open. Not counted as invocations.
    pub rejected: u64,
    pub min_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub last_error: Option<String>,
    /// Unix millis of the most recent invocation.
    pub last_invoked_ms: Option<u64>,
}

/// Records guarded call outcomes keyed by (owner, operation).
#[derive(Default)]
pub struct MetricsRecorder {
    stats: Mutex<HashMap<(String, String), CallStats>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        owner: &str,
        operation: &str,
        latency: Duration,
        error: Option<&PluginError>,
    ) {
        let now = SystemTime::now();
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            let entry = stats
                .entry((owner.to_string(), operation.to_string()))
                .or_default();
            entry.invocations += 1;
            entry.total_latency += latency;
            entry.max_latency = entry.max_latency.max(latency);
            entry.min_latency = Some(entry.min_latency.map_or(latency, |m| m.min(latency)));
            entry.last_invoked = Some(now);
            match error {
                None => entry.successes += 1,
                Some(e) => {
                    entry.failures += 1;
                    entry.last_error = Some((now, e.to_string()));
                },
            }
        }

        #[cfg(feature = "metrics")]
        {
            counter!(
                plugin_metrics::INVOCATIONS_TOTAL,
                labels::PLUGIN => owner.to_string(),
                labels::OPERATION => operation.to_string()
            )
            .increment(1);
            histogram!(
                plugin_metrics::INVOCATION_DURATION_SECONDS,
                labels::PLUGIN => owner.to_string(),
                labels::OPERATION => operation.to_string()
            )
            .record(latency.as_secs_f64());
            if let Some(e) = error {
                counter!(
                    plugin_metrics::FAILURES_TOTAL,
                    labels::PLUGIN => owner.to_string(),
                    labels::OPERATION => operation.to_string(),
                    labels::ERROR_KIND => e.kind().as_str()
                )
                .increment(1);
            }
        }
    }

    pub fn record_rejection(&self, owner: &str, operation: &str) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats
                .entry((owner.to_string(), operation.to_string()))
                .or_default()
                .rejected += 1;
        }

        #[cfg(feature = "metrics")]
        counter!(
            plugin_metrics::CIRCUIT_REJECTIONS_TOTAL,
            labels::PLUGIN => owner.to_string(),
            labels::OPERATION => operation.to_string()
        )
        .increment(1);
    }

    /// Aggregate over every owner, or over one owner's operations.
    pub fn snapshot(&self, owner: Option<&str>) -> HookMetrics {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let mut total = CallStats::default();
        for ((entry_owner, _), s) in stats.iter() {
            if owner.is_some_and(|o| o != entry_owner) {
                continue;
            }
            total.invocations += s.invocations;
            total.successes += s.successes;
            total.failures += s.failures;
            total.rejected += s.rejected;
            total.total_latency += s.total_latency;
            total.max_latency = total.max_latency.max(s.max_latency);
            total.min_latency = match (total.min_latency, s.min_latency) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            if s.last_invoked > total.last_invoked {
                total.last_invoked = s.last_invoked;
            }
            if let Some((at, _)) = &s.last_error
                && total.last_error.as_ref().is_none_or(|(t, _)| at > t)
            {
                total.last_error = s.last_error.clone();
            }
        }
        drop(stats);

        let ms = |d: Duration| d.as_micros() as f64 / 1000.0;
        let has_calls = total.invocations > 0;
        HookMetrics {
            owner: owner.map(str::to_string),
            invocations: total.invocations,
            successes: total.successes,
            failures: total.failures,
            rejected: total.rejected,
            min_latency_ms: total.min_latency.map(ms),
            avg_latency_ms: has_calls
                .then(|| ms(total.total_latency) / total.invocations as f64),
            max_latency_ms: has_calls.then(|| ms(total.max_latency)),
            last_error: total.last_error.map(|(_, e)| e),
            last_invoked_ms: total.last_invoked.and_then(|t| {
                t.duration_since(UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_millis() as u64)
            }),
        }
    }

    /// Forget everything recorded for `owner`.
    pub fn clear_owner(&self, owner: &str) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(o, _), _| o != owner);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> PluginError {
        PluginError::execution("b", "process_message", "boom")
    }

    #[test]
    fn aggregates_latency_and_counts() {
        let rec = MetricsRecorder::new();
        rec.record("a", "chat", Duration::from_millis(10), None);
        rec.record("a", "chat", Duration::from_millis(30), None);
        rec.record("a", "list_models", Duration::from_millis(20), Some(&failure()));

        let m = rec.snapshot(Some("a"));
        assert_eq!(m.invocations, 3);
        assert_eq!(m.successes, 2);
        assert_eq!(m.failures, 1);
        assert_eq!(m.min_latency_ms, Some(10.0));
        assert_eq!(m.max_latency_ms, Some(30.0));
        assert_eq!(m.avg_latency_ms, Some(20.0));
        assert!(m.last_error.unwrap().contains("boom"));
        assert!(m.last_invoked_ms.is_some());
    }

    #[test]
    fn owner_filter_and_global_view() {
        let rec = MetricsRecorder::new();
        rec.record("a", "x", Duration::from_millis(1), None);
        rec.record("b", "x", Duration::from_millis(1), Some(&failure()));
        rec.record_rejection("b", "x");

        assert_eq!(rec.snapshot(None).invocations, 2);
        let b = rec.snapshot(Some("b"));
        assert_eq!(b.failures, 1);
        assert_eq!(b.rejected, 1);
        assert_eq!(b.owner.as_deref(), Some("b"));
    }

    #[test]
    fn empty_snapshot_has_no_latency() {
        let m = MetricsRecorder::new().snapshot(Some("ghost"));
        assert_eq!(m.invocations, 0);
        assert!(m.avg_latency_ms.is_none());
        assert!(m.min_latency_ms.is_none());
    }

    #[test]
    fn clear_owner_drops_stats() {
        let rec = MetricsRecorder::new();
        rec.record("a", "x", Duration::from_millis(1), None);
        rec.clear_owner("a");
        assert_eq!(rec.snapshot(None).invocations, 0);
    }
}
