//! Raw tool-call shapes and their normalization.
//!
//! Models and client libraries hand back tool calls in several shapes.
//! [`normalize`] tries an ordered table of pure matchers, first match wins:
//!
//! | # | Shape | Example |
//! |---|-------|---------|
//! | 1 | JSON with nested `function` | `{"id": "..", "function": {"name": "..", "arguments": ".."}}` |
//! | 2 | JSON with top-level `name` | `{"name": "..", "arguments": {..}}` |
//! | 3 | [`FunctionToolCall`] | typed `function.name` / `function.arguments` |
//! | 4 | [`NamedToolCall`] | typed `name` / `arguments` |
//!
//! Arguments are then coerced into an object:
//!
//! - an object is used as is;
//! - absent or `null` becomes `{}`;
//! - a string is parsed as JSON, and if that fails (or yields something
//!   other than an object) the whole string becomes `{"text": <string>}`;
//! - any other JSON value becomes `{"text": <its JSON text>}`.
//!
//! The last two cases are reported through [`Normalized::lenient_arguments`]
//! so the dispatcher can log them.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tool::Arguments;

/// Key used for arguments that could not be read as an object.
pub const TEXT_ARGUMENT: &str = "text";

/// `function.name` / `function.arguments` pair of a typed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Tool name.
    pub name: String,
    /// JSON string, object, or `null`.
    #[serde(default)]
    pub arguments: Value,
}

/// A typed call in the OpenAI layout: an id plus a nested function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionToolCall {
    /// Provider-assigned call id.
    #[serde(default)]
    pub id: Option<String>,
    /// The function being called.
    pub function: FunctionCall,
}

/// A typed call with a bare name and arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedToolCall {
    /// Caller-assigned call id.
    #[serde(default)]
    pub id: Option<String>,
    /// Tool name.
    pub name: String,
    /// JSON string, object, or `null`.
    #[serde(default)]
    pub arguments: Value,
}

/// A tool call as received, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawToolCall {
    /// Untyped JSON (shapes 1 and 2).
    Json(Value),
    /// Typed call with a nested function (shape 3).
    Function(FunctionToolCall),
    /// Typed call with a bare name (shape 4).
    Named(NamedToolCall),
}

impl From<Value> for RawToolCall {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<FunctionToolCall> for RawToolCall {
    fn from(call: FunctionToolCall) -> Self {
        Self::Function(call)
    }
}

impl From<NamedToolCall> for RawToolCall {
    fn from(call: NamedToolCall) -> Self {
        Self::Named(call)
    }
}

/// A normalized tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRequest {
    /// Call id, generated when the raw call had none.
    pub call_id: String,
    /// Name to resolve in the registry.
    pub tool_name: String,
    /// Arguments, always an object.
    pub arguments: Arguments,
}

/// Result of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The normalized call.
    pub request: ToolCallRequest,
    /// The raw argument text when it had to be wrapped as `{"text": ..}`.
    pub lenient_arguments: Option<String>,
}

/// A pure shape matcher: the name of the call, its id, and its raw
/// arguments, or `None` if the shape does not apply.
type Matcher = fn(&RawToolCall) -> Option<(String, Option<String>, Value)>;

/// Shape matchers in priority order.
const MATCHERS: [(&str, Matcher); 4] = [
    ("json_function", match_json_function),
    ("json_named", match_json_named),
    ("function", match_function),
    ("named", match_named),
];

fn json_call_id(object: &Map<String, Value>) -> Option<String> {
    ["id", "call_id"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}

fn match_json_function(raw: &RawToolCall) -> Option<(String, Option<String>, Value)> {
    let RawToolCall::Json(Value::Object(object)) = raw else {
        return None;
    };
    let function = object.get("function")?.as_object()?;
    let name = function.get("name")?.as_str()?;
    let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);
    Some((name.to_owned(), json_call_id(object), arguments))
}

fn match_json_named(raw: &RawToolCall) -> Option<(String, Option<String>, Value)> {
    let RawToolCall::Json(Value::Object(object)) = raw else {
        return None;
    };
    let name = object.get("name")?.as_str()?;
    let arguments = object.get("arguments").cloned().unwrap_or(Value::Null);
    Some((name.to_owned(), json_call_id(object), arguments))
}

fn match_function(raw: &RawToolCall) -> Option<(String, Option<String>, Value)> {
    let RawToolCall::Function(call) = raw else {
        return None;
    };
    Some((
        call.function.name.clone(),
        call.id.clone(),
        call.function.arguments.clone(),
    ))
}

fn match_named(raw: &RawToolCall) -> Option<(String, Option<String>, Value)> {
    let RawToolCall::Named(call) = raw else {
        return None;
    };
    Some((call.name.clone(), call.id.clone(), call.arguments.clone()))
}

/// Coerces raw arguments into an object. The second element is the text
/// that was wrapped under [`TEXT_ARGUMENT`], if any.
pub fn coerce_arguments(raw: Value) -> (Arguments, Option<String>) {
    match raw {
        Value::Object(object) => (object, None),
        Value::Null => (Arguments::new(), None),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(object)) => (object, None),
            _ => (wrap_text(text.clone()), Some(text)),
        },
        other => {
            let text = other.to_string();
            (wrap_text(text.clone()), Some(text))
        }
    }
}

fn wrap_text(text: String) -> Arguments {
    let mut arguments = Arguments::new();
    arguments.insert(TEXT_ARGUMENT.to_owned(), Value::String(text));
    arguments
}

/// Generates a fresh `call_`-prefixed id.
pub fn generate_call_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("call_{suffix}")
}

/// Normalizes a raw call, or returns `None` when no shape matches.
///
/// Blank tool names and blank ids count as missing.
pub fn normalize(raw: &RawToolCall) -> Option<Normalized> {
    let (shape, (tool_name, call_id, arguments)) = MATCHERS
        .iter()
        .find_map(|(shape, matcher)| matcher(raw).map(|m| (*shape, m)))?;
    if tool_name.trim().is_empty() {
        return None;
    }
    let call_id = call_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(generate_call_id);
    let (arguments, lenient_arguments) = coerce_arguments(arguments);
    tracing::trace!(shape, tool = %tool_name, call_id = %call_id, "normalized tool call");
    Some(Normalized {
        request: ToolCallRequest {
            call_id,
            tool_name,
            arguments,
        },
        lenient_arguments,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(raw: impl Into<RawToolCall>) -> ToolCallRequest {
        normalize(&raw.into()).unwrap().request
    }

    #[test]
    fn test_json_function_shape_with_string_arguments() {
        let req = request(json!({
            "id": "call_abc",
            "type": "function",
            "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}
        }));
        assert_eq!(req.call_id, "call_abc");
        assert_eq!(req.tool_name, "get_weather");
        assert_eq!(req.arguments["city"], "Oslo");
    }

    #[test]
    fn test_json_function_shape_with_object_arguments() {
        let req = request(json!({
            "function": {"name": "add", "arguments": {"a": 1, "b": 2}}
        }));
        assert_eq!(req.arguments["b"], 2);
        assert!(req.call_id.starts_with("call_"));
    }

    #[test]
    fn test_json_named_shape() {
        let req = request(json!({"name": "ping", "arguments": {}, "call_id": "c1"}));
        assert_eq!(req.tool_name, "ping");
        assert_eq!(req.call_id, "c1");
        assert!(req.arguments.is_empty());
    }

    #[test]
    fn test_nested_function_wins_over_top_level_name() {
        let req = request(json!({
            "name": "outer",
            "function": {"name": "inner", "arguments": null}
        }));
        assert_eq!(req.tool_name, "inner");
    }

    #[test]
    fn test_typed_shapes() {
        let function = FunctionToolCall {
            id: Some("f1".into()),
            function: FunctionCall {
                name: "crypto_price".into(),
                arguments: json!("{\"symbol\": \"BTC\"}"),
            },
        };
        let req = request(function);
        assert_eq!(req.call_id, "f1");
        assert_eq!(req.arguments["symbol"], "BTC");

        let named = NamedToolCall {
            id: None,
            name: "echo".into(),
            arguments: json!({"x": true}),
        };
        let req = request(named);
        assert_eq!(req.tool_name, "echo");
        assert_eq!(req.arguments["x"], true);
    }

    #[test]
    fn test_unparsable_string_becomes_text() {
        let normalized = normalize(&json!({"name": "t", "arguments": "not json"}).into()).unwrap();
        assert_eq!(normalized.request.arguments, wrap_text("not json".into()));
        assert_eq!(normalized.lenient_arguments.as_deref(), Some("not json"));
    }

    #[test]
    fn test_non_object_json_becomes_text() {
        let (args, lenient) = coerce_arguments(json!("42"));
        assert_eq!(args[TEXT_ARGUMENT], "42");
        assert_eq!(lenient.as_deref(), Some("42"));

        let (args, _) = coerce_arguments(json!([1, 2]));
        assert_eq!(args[TEXT_ARGUMENT], "[1,2]");
    }

    #[test]
    fn test_missing_or_null_arguments_are_empty() {
        let req = request(json!({"name": "t"}));
        assert!(req.arguments.is_empty());
        let (args, lenient) = coerce_arguments(Value::Null);
        assert!(args.is_empty());
        assert!(lenient.is_none());
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert!(normalize(&json!({"arguments": {}}).into()).is_none());
        assert!(normalize(&json!({"name": 42}).into()).is_none());
        assert!(normalize(&json!({"function": "get_weather"}).into()).is_none());
        assert!(normalize(&json!("get_weather").into()).is_none());
        assert!(normalize(&json!({"name": "  "}).into()).is_none());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_call_id();
        let b = generate_call_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), "call_".len() + 24);
    }

    #[test]
    fn test_blank_id_is_replaced() {
        let req = request(json!({"id": "", "name": "t"}));
        assert!(req.call_id.starts_with("call_"));
    }
}
