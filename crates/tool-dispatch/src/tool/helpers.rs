//! Helper functions for creating tools.

use std::future::Future;

use serde_json::Value;

use super::{Arguments, FnTool, ToolDefinition, ToolError};

/// Creates a [`Tool`](super::Tool) from an async closure.
///
/// The closure receives the normalized arguments and returns a
/// `Result<impl Into<Value>, ToolError>`; returning a `String` works via
/// `Value`'s `From<String>` impl.
///
/// # Example
///
/// ```rust
/// use tool_dispatch::tool::{tool_fn, ToolDefinition};
/// use serde_json::json;
///
/// let add = tool_fn(
///     ToolDefinition::new("add", "Add two numbers")
///         .with_parameters(json!({
///             "type": "object",
///             "properties": {
///                 "a": { "type": "number" },
///                 "b": { "type": "number" }
///             },
///             "required": ["a", "b"]
///         }))
///         .cacheable(None),
///     |args| async move {
///         let a = args.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
///         let b = args.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
///         Ok(json!(a + b))
///     },
/// );
/// ```
pub fn tool_fn<F, Fut, O>(definition: ToolDefinition, handler: F) -> FnTool<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<Value> + Send + 'static,
{
    FnTool {
        definition,
        handler,
    }
}
