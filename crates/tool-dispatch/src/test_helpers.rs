//! Pre-built tools for testing code that uses the dispatcher.
//!
//! Available when the `test-utils` feature is enabled, allowing
//! downstream crates to reuse these tools in their own test suites. Also
//! compiled during `#[cfg(test)]` for this crate's own tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::ErrorCode;
use crate::tool::{Arguments, Tool, ToolDefinition, ToolError, ToolFuture};

/// Counts its invocations and echoes its arguments.
///
/// Returns `{"arguments": <args>, "invocation": <n>}` where `n` starts at 1,
/// so two responses with the same `invocation` came from the same run.
#[derive(Debug)]
pub struct CountingTool {
    definition: ToolDefinition,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingTool {
    /// A non-cacheable counting tool.
    pub fn new(name: &str) -> Self {
        Self {
            definition: ToolDefinition::new(name, "Counts invocations"),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// A cacheable counting tool with an optional TTL.
    pub fn cacheable(name: &str, ttl: Option<Duration>) -> Self {
        let mut tool = Self::new(name);
        tool.definition = tool.definition.cacheable(ttl);
        tool
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times `run` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for CountingTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn run(&self, arguments: Arguments) -> ToolFuture<'_> {
        Box::pin(async move {
            let invocation = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(json!({"arguments": arguments, "invocation": invocation}))
        })
    }
}

/// Always fails with a fixed message.
#[derive(Debug)]
pub struct FailingTool {
    definition: ToolDefinition,
    message: String,
    code: ErrorCode,
}

impl FailingTool {
    /// Fails with `message` and `TOOL_EXEC_ERROR`.
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            definition: ToolDefinition::new(name, "Always fails"),
            message: message.to_owned(),
            code: ErrorCode::ToolExecutionError,
        }
    }

    /// Fails with the given code instead.
    #[must_use]
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Marks the tool cacheable.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.definition = self.definition.cacheable(None);
        self
    }
}

impl Tool for FailingTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn run(&self, _arguments: Arguments) -> ToolFuture<'_> {
        let err = ToolError::new(self.message.clone()).with_code(self.code);
        Box::pin(async move { Err(err) })
    }
}

/// Sleeps, then returns `"done"`.
#[derive(Debug)]
pub struct SleepyTool {
    definition: ToolDefinition,
    duration: Duration,
}

impl SleepyTool {
    /// Sleeps for `duration` on every call.
    pub fn new(name: &str, duration: Duration) -> Self {
        Self {
            definition: ToolDefinition::new(name, "Sleeps"),
            duration,
        }
    }
}

impl Tool for SleepyTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn run(&self, _arguments: Arguments) -> ToolFuture<'_> {
        Box::pin(async move {
            tokio::time::sleep(self.duration).await;
            Ok(Value::String("done".into()))
        })
    }
}

/// Panics when polled.
#[derive(Debug)]
pub struct PanickingTool {
    definition: ToolDefinition,
    message: String,
}

impl PanickingTool {
    /// Panics with `message`.
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            definition: ToolDefinition::new(name, "Panics"),
            message: message.to_owned(),
        }
    }
}

async fn explode(message: String) -> Result<Value, ToolError> {
    panic!("{message}")
}

impl Tool for PanickingTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn run(&self, _arguments: Arguments) -> ToolFuture<'_> {
        Box::pin(explode(self.message.clone()))
    }
}
