//! Tool definitions: the static description a tool advertises.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Describes a tool to the dispatcher and to the model.
///
/// Tools are **not** cacheable unless they opt in with
/// [`cacheable`](Self::cacheable). Only idempotent tools without side
/// effects should do so; the dispatcher memoizes their results by argument
/// fingerprint.
///
/// ```rust
/// use std::time::Duration;
/// use tool_dispatch::tool::ToolDefinition;
/// use serde_json::json;
///
/// let def = ToolDefinition::new("get_weather", "Current weather for a city")
///     .with_parameters(json!({
///         "type": "object",
///         "properties": { "city": { "type": "string" } },
///         "required": ["city"]
///     }))
///     .cacheable(Some(Duration::from_secs(600)));
///
/// assert!(def.cacheable);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name the model uses to call it.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON-schema-like description of the accepted arguments.
    pub parameters: Value,
    /// Whether results may be memoized.
    #[serde(default)]
    pub cacheable: bool,
    /// TTL for cached results. `None` uses the dispatcher's default.
    #[serde(default, with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<Duration>,
}

impl ToolDefinition {
    /// Creates a non-cacheable definition accepting an empty object.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object", "properties": {}}),
            cacheable: false,
            default_ttl: None,
        }
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Marks the tool as idempotent and cacheable.
    #[must_use]
    pub fn cacheable(mut self, ttl: Option<Duration>) -> Self {
        self.cacheable = true;
        self.default_ttl = ttl;
        self
    }

    /// The function-calling schema sent to OpenAI-compatible backends.
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
