//! # tool-dispatch
//!
//! Async dispatch of model-requested tool calls for LLM agents.
//!
//! A model hands back tool calls in whatever shape its client library
//! produces. This crate turns each one into a uniform [`ToolResponse`]:
//! it normalizes the call, resolves the tool by name, serves idempotent
//! tools from a TTL cache, runs the rest with timing, timeout and panic
//! capture, and records every outcome in a metrics tracker and a
//! severity-tagged diagnostic log.
//!
//! # Architecture
//!
//! ```text
//!   agent loop ──invoke(raw call)──▶ Dispatcher ──▶ ToolResponse ──▶ ContextManager
//!                                        │
//!          ┌──────────────┬──────────────┼──────────────┬───────────────┐
//!          ▼              ▼              ▼              ▼               ▼
//!    ToolRegistry     ToolCache    MetricsTracker  DiagnosticLog    dyn Tool
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tool_dispatch::{ContextManager, Dispatcher, ToolDefinition, ToolRegistry, tool_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tool_dispatch::RuntimeError> {
//! let mut registry = ToolRegistry::new();
//! registry.register_tool(Arc::new(tool_fn(
//!     ToolDefinition::new("get_weather", "Current weather for a city").cacheable(None),
//!     |args| async move {
//!         let city = args.get("city").and_then(|v| v.as_str()).unwrap_or("nowhere");
//!         Ok(format!("Sunny in {city}"))
//!     },
//! )))?;
//!
//! let dispatcher = Dispatcher::new(registry);
//! let contexts = ContextManager::new();
//! let session = contexts.get_or_create(None);
//!
//! let response = dispatcher
//!     .invoke(json!({
//!         "id": "call_1",
//!         "function": {"name": "get_weather", "arguments": "{\"city\": \"Oslo\"}"}
//!     }))
//!     .await;
//! assert_eq!(response.content(), "Sunny in Oslo");
//! contexts.record_response(&session.session_id, &response)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`tool`] | The [`Tool`] trait, definitions, errors and the registry |
//! | [`dispatch`] | The [`Dispatcher`], raw-call normalization and [`ToolResponse`] |
//! | [`cache`] | TTL result cache and key derivation |
//! | [`metrics`] | Per-execution timing and aggregate statistics |
//! | [`diagnostics`] | Append-only log of errors and state transitions |
//! | [`context`] | Per-session state store |
//! | [`error`] | [`ErrorCode`], [`Severity`] and [`RuntimeError`] |

#![warn(missing_docs)]

pub mod cache;
pub mod context;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod tool;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

pub use cache::ToolCache;
pub use context::ContextManager;
pub use diagnostics::DiagnosticLog;
pub use dispatch::{Dispatcher, DispatcherConfig, RawToolCall, ToolResponse};
pub use error::{ErrorCode, RuntimeError, Severity};
pub use metrics::MetricsTracker;
pub use tool::{Tool, ToolDefinition, ToolError, ToolRegistry, tool_fn};
