//! The tool capability trait and its closure-backed implementation.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use super::{ToolDefinition, ToolError};

/// Normalized tool arguments: always a JSON object.
pub type Arguments = Map<String, Value>;

/// Boxed future returned by [`Tool::run`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// A single tool the model can invoke.
///
/// This is the whole contract the dispatcher depends on: a
/// [`ToolDefinition`] (name, description, parameter schema, cache policy)
/// and an async `run`. Concrete tools (weather, code generation, shell,
/// ...) implement it; the dispatcher never sees their types.
///
/// The trait is object-safe (uses boxed futures) so tools can be stored as
/// `Arc<dyn Tool>`. For simple tools, use [`super::tool_fn`] to wrap a
/// closure.
///
/// Tools report failure by returning [`ToolError`]; they must not retry
/// internally.
///
/// # Example
///
/// ```rust
/// use tool_dispatch::tool::{Arguments, Tool, ToolDefinition, ToolFuture};
/// use serde_json::json;
///
/// struct Echo;
///
/// impl Tool for Echo {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new("echo", "Returns its arguments")
///     }
///
///     fn run(&self, arguments: Arguments) -> ToolFuture<'_> {
///         Box::pin(async move { Ok(json!(arguments)) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// Returns the tool's definition.
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool with already-normalized arguments.
    fn run(&self, arguments: Arguments) -> ToolFuture<'_>;
}

/// A tool backed by an async closure, created via [`super::tool_fn`].
pub struct FnTool<F> {
    pub(crate) definition: ToolDefinition,
    pub(crate) handler: F,
}

impl<F> std::fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.name)
            .field("cacheable", &self.definition.cacheable)
            .finish_non_exhaustive()
    }
}

impl<F, Fut, O> Tool for FnTool<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<Value> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn run(&self, arguments: Arguments) -> ToolFuture<'_> {
        let fut = (self.handler)(arguments);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}
