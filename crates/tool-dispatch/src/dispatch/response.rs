//! The uniform dispatch result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one dispatch.
///
/// Exactly one of `result` / `error` is set, matching `success`. Build
/// through [`success`](Self::success) and [`failure`](Self::failure) to
/// keep that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Id of the call this answers.
    pub call_id: String,
    /// Tool that was requested.
    pub tool_name: String,
    /// Whether the tool produced a result.
    pub success: bool,
    /// Tool output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the result came from the cache.
    #[serde(default)]
    pub cached: bool,
}

impl ToolResponse {
    /// A successful, freshly computed response.
    pub fn success(call_id: impl Into<String>, tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
            cached: false,
        }
    }

    /// A failed response.
    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            cached: false,
        }
    }

    /// Marks the response as served from the cache.
    #[must_use]
    pub fn from_cache(mut self) -> Self {
        self.cached = true;
        self
    }

    /// The text an agent loop feeds back to the model.
    ///
    /// String results are returned verbatim, other results as JSON, and
    /// failures as `Error: <message>`.
    pub fn content(&self) -> String {
        match (&self.result, &self.error) {
            (Some(Value::String(text)), _) => text.clone(),
            (Some(value), _) => value.to_string(),
            (None, Some(error)) => format!("Error: {error}"),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_success_has_only_result() {
        let resp = ToolResponse::success("c1", "add", json!(3));
        assert!(resp.success);
        assert_eq!(resp.result, Some(json!(3)));
        assert!(resp.error.is_none());
        assert!(!resp.cached);
    }

    #[test]
    fn test_failure_serialization_omits_result() {
        let resp = ToolResponse::failure("c1", "add", "boom");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_content() {
        assert_eq!(ToolResponse::success("c", "t", json!("sunny")).content(), "sunny");
        assert_eq!(ToolResponse::success("c", "t", json!({"a": 1})).content(), r#"{"a":1}"#);
        assert_eq!(ToolResponse::failure("c", "t", "nope").content(), "Error: nope");
    }
}
