//! Tool-call dispatch: normalize, resolve, cache, execute, record.
//!
//! ```text
//! RawToolCall ──normalize──▶ ToolCallRequest
//!                                │
//!                    registry lookup ──miss──▶ TOOL_NOT_FOUND
//!                                │
//!               cacheable? ──yes──▶ cache get ──hit──▶ ToolResponse (cached)
//!                                │                │
//!                                │           single-flight lock
//!                                ▼                ▼
//!                         run (timeout, panic capture, metrics guard)
//!                                │
//!                     cache set / diagnostics ──▶ ToolResponse
//! ```
//!
//! A [`Dispatcher`] never returns an error: every failure (unknown tool,
//! unrecognized call shape, tool error, panic, timeout) becomes a
//! [`ToolResponse`] with `success == false`, a diagnostic entry, and (for
//! executions) a failed metric.
//!
//! # Cancellation
//!
//! Timeouts drop the tool's future, so a tool stops at its next `.await`.
//! Work it already handed to other tasks or threads is abandoned, not
//! joined. Dropping the dispatch future itself has the same effect and is
//! recorded as a failed operation by the metrics guard.

mod normalize;
mod response;

pub use normalize::{
    FunctionCall, FunctionToolCall, NamedToolCall, Normalized, RawToolCall, TEXT_ARGUMENT,
    ToolCallRequest, coerce_arguments, generate_call_id, normalize,
};
pub use response::ToolResponse;

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{FutureExt, StreamExt, stream};
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;

use crate::cache::{self, ToolCache, cache_key};
use crate::diagnostics::DiagnosticLog;
use crate::error::{ErrorCode, Severity};
use crate::metrics::MetricsTracker;
use crate::tool::{Tool, ToolError, ToolRegistry};

/// State entry written before each execution.
pub const STATE_EXECUTION_START: &str = "tool_execution_start";
/// State entry written after each execution.
pub const STATE_EXECUTION_END: &str = "tool_execution_end";

/// Configuration for a [`Dispatcher`].
///
/// ```rust
/// use std::time::Duration;
/// use tool_dispatch::dispatch::DispatcherConfig;
///
/// let config = DispatcherConfig {
///     default_timeout: Some(Duration::from_secs(30)),
///     ..Default::default()
/// };
/// assert!(config.warn_on_lenient_arguments);
/// ```
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Timeout applied by [`Dispatcher::invoke`]. `None` means unbounded.
    pub default_timeout: Option<Duration>,
    /// TTL for cacheable tools that do not declare their own.
    pub default_cache_ttl: Duration,
    /// Log a `WARNING` when arguments had to be wrapped as `{"text": ..}`.
    pub warn_on_lenient_arguments: bool,
    /// Write start/end state entries to the diagnostic log.
    pub record_state_transitions: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            default_cache_ttl: Duration::from_secs(300),
            warn_on_lenient_arguments: true,
            record_state_transitions: true,
        }
    }
}

type FlightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Per-key slot that serializes identical cacheable calls.
///
/// The map entry is removed when the last holder drops its slot.
struct FlightSlot<'a> {
    flights: &'a FlightMap,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            flights.remove(&self.key);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error(transparent)]
    Tool(ToolError),
    #[error("tool panicked: {0}")]
    Panic(String),
    #[error("tool timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl Failure {
    fn error_type(&self) -> &'static str {
        match self {
            Self::Tool(_) => "ToolExecution",
            Self::Panic(_) => "ToolPanic",
            Self::Timeout(_) => "ToolTimeout",
        }
    }

    fn code(&self) -> ErrorCode {
        match self {
            Self::Tool(err) => err.code,
            Self::Panic(_) => ErrorCode::ToolExecutionError,
            Self::Timeout(_) => ErrorCode::TimeoutError,
        }
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Panic(_) => Severity::Critical,
            Self::Tool(_) | Self::Timeout(_) => Severity::Error,
        }
    }

    fn record_into(&self, context: &mut Map<String, Value>) {
        if let Self::Tool(err) = self {
            context.insert("trace".into(), json!(err.trace()));
            if let Some(attempts) = err.attempts {
                context.insert("attempts".into(), json!(attempts));
            }
        }
        if let Self::Timeout(limit) = self {
            context.insert("timeout_ms".into(), json!(millis(*limit)));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn raw_to_value(raw: &RawToolCall) -> Value {
    match raw {
        RawToolCall::Json(value) => value.clone(),
        RawToolCall::Function(call) => serde_json::to_value(call).unwrap_or(Value::Null),
        RawToolCall::Named(call) => serde_json::to_value(call).unwrap_or(Value::Null),
    }
}

/// Routes tool calls to registered tools.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and
/// concurrent invocations do not block each other except for identical
/// calls to the same cacheable tool, which run once.
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use tool_dispatch::dispatch::Dispatcher;
/// use tool_dispatch::tool::{tool_fn, ToolDefinition, ToolRegistry};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut registry = ToolRegistry::new();
/// registry
///     .register_tool(Arc::new(tool_fn(
///         ToolDefinition::new("add", "Add two numbers").cacheable(None),
///         |args| async move {
///             let a = args.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
///             let b = args.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
///             Ok(json!(a + b))
///         },
///     )))
///     .unwrap();
///
/// let dispatcher = Dispatcher::new(registry);
/// let response = dispatcher
///     .invoke(json!({"function": {"name": "add", "arguments": "{\"a\": 2, \"b\": 3}"}}))
///     .await;
/// assert!(response.success);
/// assert_eq!(response.result, Some(json!(5)));
/// # }
/// ```
pub struct Dispatcher {
    registry: ToolRegistry,
    cache: Arc<ToolCache>,
    metrics: Arc<MetricsTracker>,
    diagnostics: Arc<DiagnosticLog>,
    config: DispatcherConfig,
    flights: FlightMap,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with fresh cache, metrics, and diagnostics.
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            cache: Arc::new(ToolCache::default()),
            metrics: Arc::new(MetricsTracker::new()),
            diagnostics: Arc::new(DiagnosticLog::new()),
            config: DispatcherConfig::default(),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a shared cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ToolCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Uses a shared metrics tracker.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsTracker>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Uses a shared diagnostic log.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticLog>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// The tool registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Mutable access for registration. Not for use while calls are in
    /// flight.
    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// The result cache.
    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// The metrics tracker.
    pub fn metrics(&self) -> &Arc<MetricsTracker> {
        &self.metrics
    }

    /// The diagnostic log.
    pub fn diagnostics(&self) -> &Arc<DiagnosticLog> {
        &self.diagnostics
    }

    /// The active configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Starts a background task that sweeps expired cache entries every
    /// [`CacheConfig::sweep_interval`](crate::cache::CacheConfig::sweep_interval).
    /// Must be called from within a Tokio runtime.
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let interval = self.cache.config().sweep_interval;
        cache::spawn_sweeper(Arc::clone(&self.cache), interval)
    }

    /// Dispatches one call using the configured default timeout.
    pub async fn invoke(&self, raw: impl Into<RawToolCall>) -> ToolResponse {
        self.dispatch(raw.into(), self.config.default_timeout).await
    }

    /// Dispatches one call, failing with `TIMEOUT_ERROR` after `timeout`.
    pub async fn invoke_with_timeout(
        &self,
        raw: impl Into<RawToolCall>,
        timeout: Duration,
    ) -> ToolResponse {
        self.dispatch(raw.into(), Some(timeout)).await
    }

    /// Dispatches several calls. Responses are returned in input order.
    ///
    /// With `parallel` all calls run concurrently; otherwise one after
    /// another.
    pub async fn invoke_all(&self, raws: Vec<RawToolCall>, parallel: bool) -> Vec<ToolResponse> {
        let count = raws.len();
        if parallel && count > 1 {
            stream::iter(raws)
                .map(|raw| self.invoke(raw))
                .buffered(count)
                .collect()
                .await
        } else {
            stream::iter(raws).then(|raw| self.invoke(raw)).collect().await
        }
    }

    async fn dispatch(&self, raw: RawToolCall, timeout: Option<Duration>) -> ToolResponse {
        let Some(normalized) = normalize(&raw) else {
            let call_id = generate_call_id();
            let mut context = Map::new();
            context.insert("call_id".into(), json!(call_id));
            context.insert("raw_call".into(), raw_to_value(&raw));
            self.diagnostics.add_error(
                "ToolParameter",
                "unrecognized tool call format",
                Severity::Error,
                ErrorCode::ToolParameterError,
                Some(context),
            );
            return ToolResponse::failure(call_id, "", "invalid tool call format");
        };

        if let Some(text) = &normalized.lenient_arguments {
            if self.config.warn_on_lenient_arguments {
                let mut context = Map::new();
                context.insert("tool".into(), json!(normalized.request.tool_name));
                context.insert("call_id".into(), json!(normalized.request.call_id));
                context.insert("raw_arguments".into(), json!(text));
                self.diagnostics.add_error(
                    "ToolParameter",
                    "arguments are not a JSON object; passing them as `text`",
                    Severity::Warning,
                    ErrorCode::ToolParameterError,
                    Some(context),
                );
            }
        }

        self.execute(normalized.request, timeout).await
    }

    #[tracing::instrument(
        name = "tool_dispatch",
        skip_all,
        fields(call_id = %request.call_id, tool = %request.tool_name)
    )]
    async fn execute(&self, request: ToolCallRequest, timeout: Option<Duration>) -> ToolResponse {
        let Some(tool) = self.registry.get(&request.tool_name).cloned() else {
            return self.not_found(&request);
        };

        let definition = tool.definition();
        if !definition.cacheable {
            return self.run(tool.as_ref(), request, timeout, None).await;
        }

        let key = match cache_key(&request.tool_name, &request.arguments) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = %err, "cache key derivation failed, not caching");
                return self.run(tool.as_ref(), request, timeout, None).await;
            }
        };
        if let Some(hit) = self.cache_hit(&request, &key, self.cache.get(&key)) {
            return hit;
        }

        let slot = self.flight_slot(&key);
        let _permit = slot.lock.lock().await;
        // A concurrent identical call may have filled the cache while we waited.
        // The miss was already counted above.
        if let Some(hit) = self.cache_hit(&request, &key, self.cache.recheck(&key)) {
            return hit;
        }
        let ttl = definition.default_ttl.unwrap_or(self.config.default_cache_ttl);
        self.run(tool.as_ref(), request, timeout, Some((key.as_str(), ttl)))
            .await
    }

    fn not_found(&self, request: &ToolCallRequest) -> ToolResponse {
        let message = format!("tool '{}' not found", request.tool_name);
        let mut context = Map::new();
        context.insert("tool".into(), json!(request.tool_name));
        context.insert("call_id".into(), json!(request.call_id));
        context.insert("arguments".into(), Value::Object(request.arguments.clone()));
        context.insert("available_tools".into(), json!(self.registry.names()));
        self.diagnostics.add_error(
            "ToolNotFound",
            &message,
            Severity::Error,
            ErrorCode::ToolNotFound,
            Some(context),
        );
        ToolResponse::failure(&request.call_id, &request.tool_name, message)
    }

    fn cache_hit(
        &self,
        request: &ToolCallRequest,
        key: &str,
        cached: Option<Value>,
    ) -> Option<ToolResponse> {
        let value = cached?;
        self.metrics.record_cache_hit(&request.tool_name);
        tracing::debug!(cache_key = key, "cache hit");
        Some(ToolResponse::success(&request.call_id, &request.tool_name, value).from_cache())
    }

    fn flight_slot(&self, key: &str) -> FlightSlot<'_> {
        let lock = {
            let mut flights = self.flights.lock().expect("in-flight lock poisoned");
            Arc::clone(flights.entry(key.to_owned()).or_default())
        };
        FlightSlot {
            flights: &self.flights,
            key: key.to_owned(),
            lock,
        }
    }

    async fn run(
        &self,
        tool: &dyn Tool,
        request: ToolCallRequest,
        timeout: Option<Duration>,
        cache_as: Option<(&str, Duration)>,
    ) -> ToolResponse {
        let ToolCallRequest {
            call_id,
            tool_name,
            arguments,
        } = request;

        let mut context = Map::new();
        context.insert("tool".into(), json!(tool_name));
        context.insert("call_id".into(), json!(call_id));
        context.insert("arguments".into(), Value::Object(arguments.clone()));
        if self.config.record_state_transitions {
            self.diagnostics
                .add_state(STATE_EXECUTION_START, Some(context.clone()));
        }

        let guard = self.metrics.begin(tool_name.clone());
        // `run` itself may panic before handing back a future.
        let execution = AssertUnwindSafe(async move { tool.run(arguments).await }).catch_unwind();
        let settle = |result: Result<Result<Value, ToolError>, Box<dyn Any + Send>>| match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Failure::Tool(err)),
            Err(payload) => Err(Failure::Panic(panic_message(payload.as_ref()))),
        };
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => settle(result),
                Err(_) => Err(Failure::Timeout(limit)),
            },
            None => settle(execution.await),
        };
        let elapsed = guard.elapsed();

        let mut metadata = Map::new();
        metadata.insert("call_id".into(), json!(call_id));
        if let Some((key, _)) = cache_as {
            metadata.insert("cache_key".into(), json!(key));
        }

        let response = match outcome {
            Ok(value) => {
                guard.finish(true, None, Some(metadata));
                if let Some((key, ttl)) = cache_as {
                    self.cache.set(key, value.clone(), ttl);
                }
                tracing::info!(duration_ms = millis(elapsed), "tool executed");
                context.insert("success".into(), json!(true));
                ToolResponse::success(call_id, tool_name, value)
            }
            Err(failure) => {
                let message = failure.to_string();
                guard.finish(false, Some(message.clone()), Some(metadata));
                tracing::warn!(
                    duration_ms = millis(elapsed),
                    code = %failure.code(),
                    error = %message,
                    "tool failed"
                );

                let mut error_context = context.clone();
                failure.record_into(&mut error_context);
                self.diagnostics.add_error(
                    failure.error_type(),
                    format!("error executing tool '{tool_name}': {message}"),
                    failure.severity(),
                    failure.code(),
                    Some(error_context),
                );
                context.insert("success".into(), json!(false));
                context.insert("error".into(), json!(message));
                ToolResponse::failure(call_id, tool_name, message)
            }
        };

        context.insert("duration_ms".into(), json!(millis(elapsed)));
        if self.config.record_state_transitions {
            self.diagnostics
                .add_state(STATE_EXECUTION_END, Some(context.clone()));
        }
        self.diagnostics.set_last_tool_execution(context);
        response
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::metrics::CANCELLED;
    use crate::test_helpers::{CountingTool, FailingTool, PanickingTool, SleepyTool};
    use crate::tool::{ToolDefinition, tool_fn};

    fn dispatcher(tools: Vec<Arc<dyn Tool>>) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register_tool(tool).unwrap();
        }
        Dispatcher::new(registry)
    }

    #[tokio::test]
    async fn test_success_records_metric_and_states() {
        let counter = Arc::new(CountingTool::new("echo"));
        let d = dispatcher(vec![counter.clone()]);

        let resp = d.invoke(json!({"id": "c1", "name": "echo", "arguments": {"x": 1}})).await;
        assert!(resp.success);
        assert_eq!(resp.call_id, "c1");
        assert!(!resp.cached);
        assert_eq!(resp.result.unwrap()["arguments"]["x"], 1);

        let history = d.metrics().get_operation_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].metadata.as_ref().unwrap()["call_id"], "c1");

        let states: Vec<_> = d
            .diagnostics()
            .get_states()
            .into_iter()
            .map(|s| s.entry_type)
            .collect();
        assert_eq!(states, vec![STATE_EXECUTION_START, STATE_EXECUTION_END]);

        let last = d.diagnostics().last_tool_execution().unwrap();
        assert_eq!(last["tool"], "echo");
        assert_eq!(last["success"], true);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let d = dispatcher(vec![]);
        let resp = d.invoke(json!({"name": "nonexistent", "arguments": {}})).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("nonexistent"));
        assert_eq!(d.diagnostics().get_errors_by_code(ErrorCode::ToolNotFound).len(), 1);
        assert!(d.metrics().get_operation_history().is_empty());
        assert!(d.diagnostics().get_states().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_shape() {
        let d = dispatcher(vec![]);
        let resp = d.invoke(json!({"arguments": {"x": 1}})).await;
        assert!(!resp.success);
        assert!(resp.call_id.starts_with("call_"));
        let errors = d.diagnostics().get_errors_by_code(ErrorCode::ToolParameterError);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context["raw_call"]["arguments"]["x"], 1);
        assert!(d.metrics().get_operation_history().is_empty());
    }

    #[tokio::test]
    async fn test_cacheable_tool_hits_cache() {
        let counter = Arc::new(CountingTool::cacheable("weather", None));
        let d = dispatcher(vec![counter.clone()]);

        let first = d.invoke(json!({"name": "weather", "arguments": {"city": "Oslo"}})).await;
        let second = d.invoke(json!({"name": "weather", "arguments": {"city": "Oslo"}})).await;

        assert_eq!(counter.calls(), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.result, second.result);

        let summary = d.metrics().get_metrics_summary();
        assert_eq!(summary.tool_statistics["weather"].total_calls, 1);
        assert_eq!(summary.tool_statistics["weather"].cache_hits, 1);
    }

    #[tokio::test]
    async fn test_cache_counts_one_miss_per_execution() {
        let d = dispatcher(vec![Arc::new(CountingTool::cacheable("w", None))]);
        d.invoke(json!({"name": "w"})).await;
        d.invoke(json!({"name": "w"})).await;

        let stats = d.cache().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_sweeper_uses_configured_interval() {
        let cache = Arc::new(ToolCache::new(crate::cache::CacheConfig {
            sweep_interval: Duration::from_secs(5),
            ..Default::default()
        }));
        let d = dispatcher(vec![]).with_cache(Arc::clone(&cache));
        cache.set("k", json!(1), Duration::ZERO);
        let handle = d.spawn_cache_sweeper();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.len(), 1);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(cache.is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn test_non_cacheable_tool_runs_every_time() {
        let counter = Arc::new(CountingTool::new("sudo"));
        let d = dispatcher(vec![counter.clone()]);
        for _ in 0..3 {
            d.invoke(json!({"name": "sudo", "arguments": {"cmd": "ls"}})).await;
        }
        assert_eq!(counter.calls(), 3);
        assert!(d.cache().is_empty());
    }

    #[tokio::test]
    async fn test_tool_ttl_overrides_default() {
        let counter = Arc::new(CountingTool::cacheable("t", Some(Duration::from_millis(1))));
        let d = dispatcher(vec![counter.clone()]);
        d.invoke(json!({"name": "t"})).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let again = d.invoke(json!({"name": "t"})).await;
        assert!(!again.cached);
        assert_eq!(counter.calls(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let failing = Arc::new(FailingTool::new("flaky", "upstream down").cacheable());
        let d = dispatcher(vec![failing]);
        d.invoke(json!({"name": "flaky"})).await;
        d.invoke(json!({"name": "flaky"})).await;
        assert!(d.cache().is_empty());
        assert_eq!(d.metrics().get_metrics_summary().tool_statistics["flaky"].failed_calls, 2);
    }

    #[tokio::test]
    async fn test_tool_error_is_recorded() {
        let failing = Arc::new(
            FailingTool::new("weather", "city not found").with_code(ErrorCode::ToolParameterError),
        );
        let d = dispatcher(vec![failing]);

        let resp = d.invoke(json!({"name": "weather", "arguments": {"city": "?"}})).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("city not found"));

        let errors = d.diagnostics().get_errors_by_code(ErrorCode::ToolParameterError);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Error);
        assert_eq!(errors[0].context["tool"], "weather");
        assert_eq!(errors[0].context["arguments"]["city"], "?");
        assert_eq!(errors[0].context["trace"][0], "city not found");

        let history = d.metrics().get_operation_history();
        assert_eq!(history[0].error.as_deref(), Some("city not found"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let d = dispatcher(vec![Arc::new(PanickingTool::new("bomb", "kaboom"))]);
        let resp = d.invoke(json!({"name": "bomb"})).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("kaboom"));
        assert!(d.diagnostics().has_critical());
        assert_eq!(d.metrics().get_operation_history().len(), 1);
    }

    #[tokio::test]
    async fn test_panic_before_future_is_contained() {
        let eager = tool_fn(ToolDefinition::new("eager", "Panics while building its future"), |args| {
            assert!(!args.contains_key("boom"), "sync boom");
            async { Ok::<_, ToolError>("ok") }
        });
        let d = dispatcher(vec![Arc::new(eager)]);

        let resp = d.invoke(json!({"name": "eager", "arguments": {"boom": true}})).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("sync boom"));

        let errors = d.diagnostics().get_errors_by_code(ErrorCode::ToolExecutionError);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Critical);
        let history = d.metrics().get_operation_history();
        assert_eq!(history.len(), 1);
        assert_ne!(history[0].error.as_deref(), Some(CANCELLED));

        let ok = d.invoke(json!({"name": "eager"})).await;
        assert!(ok.success);
    }

    #[tokio::test]
    async fn test_timeout() {
        let d = dispatcher(vec![Arc::new(SleepyTool::new("slow", Duration::from_secs(5)))]);
        let resp = d
            .invoke_with_timeout(json!({"name": "slow"}), Duration::from_millis(20))
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("timed out"));

        let timeouts = d.diagnostics().get_errors_by_code(ErrorCode::TimeoutError);
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].context["timeout_ms"], 20);
        let history = d.metrics().get_operation_history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
    }

    #[tokio::test]
    async fn test_default_timeout_from_config() {
        let d = dispatcher(vec![Arc::new(SleepyTool::new("slow", Duration::from_secs(5)))])
            .with_config(DispatcherConfig {
                default_timeout: Some(Duration::from_millis(10)),
                ..Default::default()
            });
        let resp = d.invoke(json!({"name": "slow"})).await;
        assert!(!resp.success);
    }

    #[tokio::test]
    async fn test_dropped_dispatch_records_cancellation() {
        let d = dispatcher(vec![Arc::new(SleepyTool::new("slow", Duration::from_secs(5)))]);
        let outer = tokio::time::timeout(Duration::from_millis(20), d.invoke(json!({"name": "slow"}))).await;
        assert!(outer.is_err());

        let history = d.metrics().get_operation_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].error.as_deref(), Some(CANCELLED));
    }

    #[tokio::test]
    async fn test_lenient_arguments_warning() {
        let counter = Arc::new(CountingTool::new("echo"));
        let d = dispatcher(vec![counter]);
        let resp = d.invoke(json!({"name": "echo", "arguments": "not json"})).await;
        assert!(resp.success);
        assert_eq!(resp.result.unwrap()["arguments"]["text"], "not json");

        let warnings = d.diagnostics().get_errors_by_severity(Some(Severity::Warning));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, Some(ErrorCode::ToolParameterError));
    }

    #[tokio::test]
    async fn test_lenient_warning_can_be_disabled() {
        let d = dispatcher(vec![Arc::new(CountingTool::new("echo"))]).with_config(
            DispatcherConfig {
                warn_on_lenient_arguments: false,
                record_state_transitions: false,
                ..Default::default()
            },
        );
        d.invoke(json!({"name": "echo", "arguments": "plain"})).await;
        assert!(d.diagnostics().is_empty());
        // The last execution is still tracked.
        assert!(d.diagnostics().last_tool_execution().is_some());
    }

    #[tokio::test]
    async fn test_invoke_all_preserves_order() {
        let d = dispatcher(vec![
            Arc::new(SleepyTool::new("slow", Duration::from_millis(30))),
            Arc::new(CountingTool::new("fast")),
        ]);
        let calls: Vec<RawToolCall> = vec![
            json!({"id": "1", "name": "slow"}).into(),
            json!({"id": "2", "name": "fast"}).into(),
            json!({"id": "3", "name": "missing"}).into(),
        ];
        for parallel in [true, false] {
            let responses = d.invoke_all(calls.clone(), parallel).await;
            let ids: Vec<_> = responses.iter().map(|r| r.call_id.as_str()).collect();
            assert_eq!(ids, vec!["1", "2", "3"]);
            assert!(responses[0].success && responses[1].success && !responses[2].success);
        }
    }

    #[tokio::test]
    async fn test_flight_slots_are_released() {
        let d = dispatcher(vec![Arc::new(CountingTool::cacheable("t", None))]);
        d.invoke(json!({"name": "t"})).await;
        assert!(d.flights.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_typed_calls() {
        let d = dispatcher(vec![Arc::new(CountingTool::new("echo"))]);
        let resp = d
            .invoke(NamedToolCall {
                id: Some("n1".into()),
                name: "echo".into(),
                arguments: json!({"a": 1}),
            })
            .await;
        assert!(resp.success);
        assert_eq!(resp.call_id, "n1");
    }
}
