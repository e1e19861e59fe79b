//! Tool error types.

use std::error::Error as StdError;

use crate::error::ErrorCode;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Error returned by a tool's run operation.
///
/// Carries the message surfaced to the model plus the [`ErrorCode`] the
/// dispatcher records. An optional `source` keeps the underlying failure so
/// the diagnostic log can store its full causal chain.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable error description.
    pub message: String,
    /// Classification recorded in diagnostics. Defaults to
    /// [`ErrorCode::ToolExecutionError`].
    pub code: ErrorCode,
    /// Attempts already made, when the failure was retried upstream.
    pub attempts: Option<u32>,
    #[source]
    source: Option<BoxError>,
}

impl ToolError {
    /// Creates a new tool error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::ToolExecutionError,
            attempts: None,
            source: None,
        }
    }

    /// Creates an error for arguments the tool could not accept.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(message).with_code(ErrorCode::ToolParameterError)
    }

    /// Overrides the recorded error code.
    #[must_use]
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Records how many attempts were made before giving up.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// The message followed by every cause in the `source` chain.
    ///
    /// Returns a single element when there is no attached cause.
    pub fn trace(&self) -> Vec<String> {
        let mut trace = vec![self.message.clone()];
        let mut current = StdError::source(self);
        while let Some(cause) = current {
            trace.push(cause.to_string());
            current = cause.source();
        }
        trace
    }
}

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[derive(Debug, thiserror::Error)]
    #[error("upstream unavailable")]
    struct Upstream(#[source] Refused);

    #[test]
    fn test_tool_error_defaults() {
        let err = ToolError::new("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.code, ErrorCode::ToolExecutionError);
        assert!(err.attempts.is_none());
        assert_eq!(err.trace(), vec!["boom".to_string()]);
    }

    #[test]
    fn test_invalid_parameters_code() {
        let err = ToolError::invalid_parameters("missing `city`");
        assert_eq!(err.code, ErrorCode::ToolParameterError);
    }

    #[test]
    fn test_trace_walks_source_chain() {
        let err = ToolError::new("weather lookup failed").with_source(Upstream(Refused));
        assert_eq!(
            err.trace(),
            vec![
                "weather lookup failed".to_string(),
                "upstream unavailable".to_string(),
                "connection refused".to_string(),
            ]
        );
    }

    #[test]
    fn test_with_attempts() {
        let err = ToolError::from("rate limited")
            .with_code(ErrorCode::LlmRateLimit)
            .with_attempts(3);
        assert_eq!(err.attempts, Some(3));
        assert_eq!(err.code, ErrorCode::LlmRateLimit);
    }
}
