//! Tool capability set and registry.
//!
//! ```text
//!   ToolDefinition: name, description, parameter schema, cache policy
//!       │
//!   Tool: definition + async run(arguments)
//!       │
//!   ToolRegistry: stores tools by name, read by the dispatcher
//! ```
//!
//! Tools are opaque to the rest of the crate: the
//! [`Dispatcher`](crate::dispatch::Dispatcher) only ever talks to
//! `Arc<dyn Tool>`.

mod definition;
mod error;
mod handler;
mod helpers;
mod registry;

pub use definition::ToolDefinition;
pub use error::ToolError;
pub use handler::{Arguments, FnTool, Tool, ToolFuture};
pub use helpers::tool_fn;
pub use registry::ToolRegistry;
