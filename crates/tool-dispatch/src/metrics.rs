//! Execution metrics for tool invocations.
//!
//! [`MetricsTracker`] keeps an ordered history of [`ToolMetric`]s plus
//! exact running totals. Every mutation happens under one mutex, so counts
//! stay exact when many dispatches finish concurrently.
//!
//! Timing uses a monotonic [`Instant`] for durations and a wall-clock
//! [`DateTime<Utc>`] for reporting. The recorded `end_time` is derived from
//! `start_time + duration`, which keeps `duration = end_time - start_time`
//! true even if the wall clock jumps mid-operation.
//!
//! Cache hits are counted separately through
//! [`record_cache_hit`](MetricsTracker::record_cache_hit); they are not
//! executions and never appear in the history.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RuntimeError;

/// Error recorded when an [`OperationGuard`] is dropped unfinished.
pub const CANCELLED: &str = "operation cancelled";

/// Start marker returned by [`MetricsTracker::start_operation`].
#[derive(Debug, Clone, Copy)]
pub struct OperationStart {
    started_at: DateTime<Utc>,
    instant: Instant,
}

impl OperationStart {
    fn now() -> Self {
        Self {
            started_at: Utc::now(),
            instant: Instant::now(),
        }
    }

    /// Wall-clock time the operation started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time elapsed since the operation started.
    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }
}

/// One completed tool execution. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMetric {
    /// Tool that ran.
    pub tool_name: String,
    /// Wall-clock start.
    pub start_time: DateTime<Utc>,
    /// `start_time + duration`.
    pub end_time: DateTime<Utc>,
    /// Monotonic execution time, serialized as seconds.
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    /// Whether the tool returned normally.
    pub success: bool,
    /// Failure description, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Caller-supplied extra data (call id, cache key, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Per-tool aggregate in a [`MetricsSummary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStatistics {
    /// Executions recorded (successful + failed).
    pub total_calls: u64,
    /// Executions that succeeded.
    pub successful_calls: u64,
    /// Executions that failed.
    pub failed_calls: u64,
    /// Sum of execution durations.
    #[serde(serialize_with = "as_secs")]
    pub total_duration: Duration,
    /// `total_duration / total_calls`, zero when nothing ran.
    #[serde(serialize_with = "as_secs")]
    pub average_duration: Duration,
    /// Failures that carried an error description.
    pub error_count: u64,
    /// Dispatches answered from the cache.
    pub cache_hits: u64,
}

/// Aggregated view returned by [`MetricsTracker::get_metrics_summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// When tracking started (construction or last reset).
    pub start_time: DateTime<Utc>,
    /// Sum of every recorded duration.
    #[serde(serialize_with = "as_secs")]
    pub total_execution_time: Duration,
    /// Number of recorded executions.
    pub total_operations: u64,
    /// Sum of per-tool error counts.
    pub total_errors: u64,
    /// Cache hits across all tools.
    pub total_cache_hits: u64,
    /// Per-tool aggregates, keyed by tool name.
    pub tool_statistics: BTreeMap<String, ToolStatistics>,
}

/// A failed execution as reported by [`MetricsTracker::get_error_summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// When the failed execution started.
    pub timestamp: DateTime<Utc>,
    /// Failure description, if one was given.
    pub error: Option<String>,
    /// Metadata recorded with the execution.
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Serialize)]
struct MetricsExport<'a> {
    summary: MetricsSummary,
    operation_history: &'a [ToolMetric],
}

struct MetricsState {
    start_time: DateTime<Utc>,
    history: Vec<ToolMetric>,
    total_execution_time: Duration,
    error_counts: HashMap<String, u64>,
    cache_hits: HashMap<String, u64>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            start_time: Utc::now(),
            history: Vec::new(),
            total_execution_time: Duration::ZERO,
            error_counts: HashMap::new(),
            cache_hits: HashMap::new(),
        }
    }

    fn summary(&self) -> MetricsSummary {
        let mut tool_statistics: BTreeMap<String, ToolStatistics> = BTreeMap::new();
        for metric in &self.history {
            let stats = tool_statistics.entry(metric.tool_name.clone()).or_default();
            stats.total_calls += 1;
            if metric.success {
                stats.successful_calls += 1;
            } else {
                stats.failed_calls += 1;
            }
            stats.total_duration += metric.duration;
        }
        for (tool, hits) in &self.cache_hits {
            tool_statistics.entry(tool.clone()).or_default().cache_hits = *hits;
        }
        for (tool, stats) in &mut tool_statistics {
            stats.error_count = self.error_counts.get(tool).copied().unwrap_or(0);
            if stats.total_calls > 0 {
                let calls = u32::try_from(stats.total_calls).unwrap_or(u32::MAX);
                stats.average_duration = stats.total_duration / calls;
            }
        }

        MetricsSummary {
            start_time: self.start_time,
            total_execution_time: self.total_execution_time,
            total_operations: u64::try_from(self.history.len()).unwrap_or(u64::MAX),
            total_errors: self.error_counts.values().sum(),
            total_cache_hits: self.cache_hits.values().sum(),
            tool_statistics,
        }
    }
}

/// Records duration and outcome of every tool execution.
///
/// ```rust
/// use tool_dispatch::metrics::MetricsTracker;
///
/// let metrics = MetricsTracker::new();
/// let start = metrics.start_operation("get_weather");
/// metrics.end_operation("get_weather", start, true, None, None);
///
/// let summary = metrics.get_metrics_summary();
/// assert_eq!(summary.tool_statistics["get_weather"].successful_calls, 1);
/// ```
pub struct MetricsTracker {
    state: Mutex<MetricsState>,
}

impl std::fmt::Debug for MetricsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MetricsTracker")
            .field("start_time", &state.start_time)
            .field("operations", &state.history.len())
            .finish()
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsTracker {
    /// Creates a tracker whose clock starts now.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetricsState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().expect("metrics lock poisoned")
    }

    /// Marks the start of an execution of `tool_name`.
    pub fn start_operation(&self, tool_name: &str) -> OperationStart {
        tracing::trace!(tool = tool_name, "operation started");
        OperationStart::now()
    }

    /// Starts an operation and returns a guard that records it on drop.
    ///
    /// Call [`OperationGuard::finish`] with the outcome. A guard dropped
    /// without finishing records a failure with error [`CANCELLED`], so no
    /// started operation is ever left without an end record.
    pub fn begin(&self, tool_name: impl Into<String>) -> OperationGuard<'_> {
        let tool_name = tool_name.into();
        let start = self.start_operation(&tool_name);
        OperationGuard {
            tracker: self,
            tool_name,
            start: Some(start),
        }
    }

    /// Records the end of an execution and returns the stored metric.
    ///
    /// The per-tool error counter is incremented when `success` is false
    /// and an `error` is given.
    pub fn end_operation(
        &self,
        tool_name: &str,
        start: OperationStart,
        success: bool,
        error: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> ToolMetric {
        let duration = start.elapsed();
        let end_time = TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| start.started_at.checked_add_signed(delta))
            .unwrap_or(start.started_at);

        let metric = ToolMetric {
            tool_name: tool_name.to_owned(),
            start_time: start.started_at,
            end_time,
            duration,
            success,
            error,
            metadata,
        };

        let mut state = self.lock();
        state.total_execution_time += duration;
        if !success && metric.error.is_some() {
            *state.error_counts.entry(tool_name.to_owned()).or_insert(0) += 1;
        }
        state.history.push(metric.clone());
        drop(state);

        tracing::debug!(
            tool = tool_name,
            success,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "operation recorded"
        );
        metric
    }

    /// Counts a dispatch of `tool_name` that was served from the cache.
    pub fn record_cache_hit(&self, tool_name: &str) {
        *self
            .lock()
            .cache_hits
            .entry(tool_name.to_owned())
            .or_insert(0) += 1;
    }

    /// Aggregates the recorded history.
    pub fn get_metrics_summary(&self) -> MetricsSummary {
        self.lock().summary()
    }

    /// Every recorded metric, oldest first.
    pub fn get_operation_history(&self) -> Vec<ToolMetric> {
        self.lock().history.clone()
    }

    /// Failed executions grouped by tool.
    pub fn get_error_summary(&self) -> BTreeMap<String, Vec<ErrorRecord>> {
        let state = self.lock();
        let mut grouped: BTreeMap<String, Vec<ErrorRecord>> = BTreeMap::new();
        for metric in state.history.iter().filter(|m| !m.success) {
            grouped
                .entry(metric.tool_name.clone())
                .or_default()
                .push(ErrorRecord {
                    timestamp: metric.start_time,
                    error: metric.error.clone(),
                    metadata: metric.metadata.clone(),
                });
        }
        grouped
    }

    /// Discards everything and restarts the clock.
    pub fn reset(&self) {
        *self.lock() = MetricsState::new();
    }

    /// Writes `{summary, operation_history}` as pretty JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Serialization`] if encoding fails and
    /// [`RuntimeError::Io`] if the file cannot be written.
    pub fn export(&self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        let path = path.as_ref();
        let bytes = {
            let state = self.lock();
            serde_json::to_vec_pretty(&MetricsExport {
                summary: state.summary(),
                operation_history: &state.history,
            })?
        };
        std::fs::write(path, bytes).map_err(|source| RuntimeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "metrics exported");
        Ok(())
    }
}

/// Scoped operation created by [`MetricsTracker::begin`].
#[derive(Debug)]
pub struct OperationGuard<'a> {
    tracker: &'a MetricsTracker,
    tool_name: String,
    start: Option<OperationStart>,
}

impl OperationGuard<'_> {
    /// Time elapsed since the operation started.
    pub fn elapsed(&self) -> Duration {
        self.start.map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// Records the outcome and consumes the guard.
    pub fn finish(
        mut self,
        success: bool,
        error: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Option<ToolMetric> {
        let start = self.start.take()?;
        Some(
            self.tracker
                .end_operation(&self.tool_name, start, success, error, metadata),
        )
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        if let Some(start) = self.start.take() {
            self.tracker.end_operation(
                &self.tool_name,
                start,
                false,
                Some(CANCELLED.to_owned()),
                None,
            );
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn as_secs<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(metrics: &MetricsTracker, tool: &str, success: bool) {
        let start = metrics.start_operation(tool);
        let error = (!success).then(|| "boom".to_string());
        metrics.end_operation(tool, start, success, error, None);
    }

    #[test]
    fn test_empty_summary() {
        let metrics = MetricsTracker::new();
        let summary = metrics.get_metrics_summary();
        assert_eq!(summary.total_operations, 0);
        assert_eq!(summary.total_errors, 0);
        assert!(summary.tool_statistics.is_empty());
        assert_eq!(summary.total_execution_time, Duration::ZERO);
    }

    #[test]
    fn test_duration_matches_timestamps() {
        let metrics = MetricsTracker::new();
        let start = metrics.start_operation("slow");
        std::thread::sleep(Duration::from_millis(5));
        let metric = metrics.end_operation("slow", start, true, None, None);

        assert!(metric.duration >= Duration::from_millis(5));
        assert!(metric.end_time >= metric.start_time);
        let span = (metric.end_time - metric.start_time).to_std().unwrap();
        assert_eq!(span, metric.duration);
    }

    #[test]
    fn test_summary_counts() {
        let metrics = MetricsTracker::new();
        for _ in 0..3 {
            record(&metrics, "weather", true);
        }
        for _ in 0..2 {
            record(&metrics, "weather", false);
        }
        record(&metrics, "crypto", true);

        let summary = metrics.get_metrics_summary();
        assert_eq!(summary.total_operations, 6);
        assert_eq!(summary.total_errors, 2);

        let weather = &summary.tool_statistics["weather"];
        assert_eq!(weather.total_calls, 5);
        assert_eq!(weather.successful_calls, 3);
        assert_eq!(weather.failed_calls, 2);
        assert_eq!(weather.error_count, 2);
        assert_eq!(weather.average_duration, weather.total_duration / 5);

        assert_eq!(summary.tool_statistics["crypto"].total_calls, 1);
    }

    #[test]
    fn test_failure_without_error_is_not_counted_as_error() {
        let metrics = MetricsTracker::new();
        let start = metrics.start_operation("t");
        metrics.end_operation("t", start, false, None, None);
        let summary = metrics.get_metrics_summary();
        assert_eq!(summary.tool_statistics["t"].failed_calls, 1);
        assert_eq!(summary.tool_statistics["t"].error_count, 0);
    }

    #[test]
    fn test_cache_hits_are_not_executions() {
        let metrics = MetricsTracker::new();
        record(&metrics, "weather", true);
        metrics.record_cache_hit("weather");
        metrics.record_cache_hit("weather");
        metrics.record_cache_hit("crypto");

        let summary = metrics.get_metrics_summary();
        assert_eq!(summary.total_operations, 1);
        assert_eq!(summary.total_cache_hits, 3);
        assert_eq!(summary.tool_statistics["weather"].total_calls, 1);
        assert_eq!(summary.tool_statistics["weather"].cache_hits, 2);
        assert_eq!(summary.tool_statistics["crypto"].total_calls, 0);
        assert_eq!(summary.tool_statistics["crypto"].average_duration, Duration::ZERO);
        assert!(metrics.get_operation_history().len() == 1);
    }

    #[test]
    fn test_error_summary_groups_by_tool() {
        let metrics = MetricsTracker::new();
        record(&metrics, "a", false);
        record(&metrics, "a", true);
        let start = metrics.start_operation("b");
        let mut meta = Map::new();
        meta.insert("call_id".into(), json!("call_1"));
        metrics.end_operation("b", start, false, Some("bad".into()), Some(meta));

        let errors = metrics.get_error_summary();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors["a"].len(), 1);
        assert_eq!(errors["b"][0].error.as_deref(), Some("bad"));
        assert_eq!(errors["b"][0].metadata.as_ref().unwrap()["call_id"], "call_1");
    }

    #[test]
    fn test_guard_finish_records_once() {
        let metrics = MetricsTracker::new();
        let guard = metrics.begin("t");
        let metric = guard.finish(true, None, None).unwrap();
        assert!(metric.success);
        assert_eq!(metrics.get_operation_history().len(), 1);
    }

    #[test]
    fn test_guard_drop_records_cancellation() {
        let metrics = MetricsTracker::new();
        {
            let _guard = metrics.begin("t");
        }
        let history = metrics.get_operation_history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].error.as_deref(), Some(CANCELLED));
    }

    #[test]
    fn test_reset_clears_state() {
        let metrics = MetricsTracker::new();
        let before = metrics.get_metrics_summary().start_time;
        record(&metrics, "a", false);
        metrics.record_cache_hit("a");
        metrics.reset();

        let summary = metrics.get_metrics_summary();
        assert_eq!(summary.total_operations, 0);
        assert_eq!(summary.total_cache_hits, 0);
        assert!(summary.start_time >= before);
        assert!(metrics.get_error_summary().is_empty());
    }

    #[test]
    fn test_concurrent_counts_are_exact() {
        let metrics = std::sync::Arc::new(MetricsTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let metrics = std::sync::Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        record(&metrics, "shared", i % 2 == 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = &metrics.get_metrics_summary().tool_statistics["shared"];
        assert_eq!(stats.total_calls, 400);
        assert_eq!(stats.successful_calls, 200);
        assert_eq!(stats.failed_calls, 200);
        assert_eq!(stats.error_count, 200);
    }

    #[test]
    fn test_export_writes_summary_and_history() {
        let metrics = MetricsTracker::new();
        record(&metrics, "weather", true);
        record(&metrics, "weather", false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        metrics.export(&path).unwrap();

        let json: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["summary"]["total_operations"], 2);
        assert_eq!(json["summary"]["tool_statistics"]["weather"]["failed_calls"], 1);
        assert_eq!(json["operation_history"].as_array().unwrap().len(), 2);
        assert_eq!(json["operation_history"][1]["error"], "boom");
        assert!(json["operation_history"][0]["duration"].is_f64());
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let metrics = MetricsTracker::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("metrics.json");
        let err = metrics.export(&path).unwrap_err();
        assert!(matches!(err, RuntimeError::Io { .. }));
    }
}
