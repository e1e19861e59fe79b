//! Name-keyed store of tool handles.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Tool, ToolDefinition};
use crate::error::RuntimeError;

/// A registry of tools, indexed by name.
///
/// Registration order is preserved for enumeration ([`list`](Self::list),
/// [`definitions`](Self::definitions)). Re-registering a name replaces the
/// handle in place (last write wins) without changing its position.
///
/// The registry is meant to be filled before dispatch starts and then read
/// concurrently; it has no interior locking. Cloning is cheap, handles are
/// shared through `Arc`.
///
/// ```rust
/// use std::sync::Arc;
/// use tool_dispatch::tool::{tool_fn, ToolDefinition, ToolRegistry};
///
/// let mut registry = ToolRegistry::new();
/// registry
///     .register_tool(Arc::new(tool_fn(
///         ToolDefinition::new("ping", "Health check"),
///         |_args| async { Ok("pong") },
///     )))
///     .unwrap();
///
/// assert!(registry.has("ping"));
/// assert!(registry.get("pong").is_none());
/// ```
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `name`.
    ///
    /// If a tool with the same name already exists, it is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidArgument`] if `name` is empty or blank.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handle: Arc<dyn Tool>,
    ) -> Result<&mut Self, RuntimeError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "tool name must not be empty".into(),
            ));
        }
        if self.handlers.insert(name.clone(), handle).is_none() {
            self.order.push(name);
        }
        Ok(self)
    }

    /// Registers a tool under its own definition name.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_tool(&mut self, handle: Arc<dyn Tool>) -> Result<&mut Self, RuntimeError> {
        let name = handle.definition().name;
        self.register(name, handle)
    }

    /// Returns the tool registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.handlers.get(name)
    }

    /// Returns whether a tool with the given name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Removes a tool. Does nothing if it is not registered.
    pub fn unregister(&mut self, name: &str) {
        if self.handlers.remove(name).is_some() {
            self.order.retain(|n| n != name);
        }
    }

    /// Snapshot of every `(name, handle)` pair in registration order.
    ///
    /// The returned vector is independent of the registry; mutating it has
    /// no effect on registered tools.
    pub fn list(&self) -> Vec<(String, Arc<dyn Tool>)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.handlers
                    .get(name)
                    .map(|handle| (name.clone(), Arc::clone(handle)))
            })
            .collect()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Definitions of all registered tools, in registration order.
    ///
    /// This is what gets advertised to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|handle| handle.definition())
            .collect()
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
