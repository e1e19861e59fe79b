//! Error taxonomy and the crate-wide error type.
//!
//! Two separate concerns live here:
//!
//! - [`ErrorCode`] and [`Severity`] classify *recorded* failures. Every
//!   [`DiagnosticEntry`](crate::diagnostics::DiagnosticEntry) carries them,
//!   and tool failures are mapped onto them at the dispatch boundary.
//! - [`RuntimeError`] is what the fallible library APIs return (registry
//!   registration, metrics export, session import/export). Tool failures
//!   never surface as `RuntimeError`; the dispatcher folds them into a
//!   [`ToolResponse`](crate::dispatch::ToolResponse).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Closed classification of runtime failures.
///
/// The serialized form uses the short wire names shared with existing
/// diagnostic dumps (`"TOOL_EXEC_ERROR"`, `"CONFIG_ERROR"`, ...), which is
/// also what [`Display`](fmt::Display) prints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum ErrorCode {
    /// Failure that could not be classified.
    #[default]
    #[serde(rename = "UNKNOWN_ERROR")]
    UnknownError,
    /// Invalid or missing configuration.
    #[serde(rename = "CONFIG_ERROR")]
    ConfigurationError,
    /// Generic runtime execution failure.
    #[serde(rename = "EXEC_ERROR")]
    ExecutionError,
    /// An operation exceeded its deadline.
    #[serde(rename = "TIMEOUT_ERROR")]
    TimeoutError,
    /// Memory or resource exhaustion.
    #[serde(rename = "MEMORY_ERROR")]
    MemoryError,
    /// The requested tool is not registered.
    #[serde(rename = "TOOL_NOT_FOUND")]
    ToolNotFound,
    /// A tool raised an error while running.
    #[serde(rename = "TOOL_EXEC_ERROR")]
    ToolExecutionError,
    /// A tool call carried malformed or invalid arguments.
    #[serde(rename = "TOOL_PARAM_ERROR")]
    ToolParameterError,
    /// The model backend returned an API error.
    #[serde(rename = "LLM_API_ERROR")]
    LlmApiError,
    /// The model backend rate-limited the request.
    #[serde(rename = "LLM_RATE_LIMIT")]
    LlmRateLimit,
    /// The conversation no longer fits the model's context window.
    #[serde(rename = "LLM_CTX_OVERFLOW")]
    LlmContextOverflow,
    /// The agent attempted an illegal state transition.
    #[serde(rename = "INVALID_STATE")]
    InvalidStateTransition,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::UnknownError,
        Self::ConfigurationError,
        Self::ExecutionError,
        Self::TimeoutError,
        Self::MemoryError,
        Self::ToolNotFound,
        Self::ToolExecutionError,
        Self::ToolParameterError,
        Self::LlmApiError,
        Self::LlmRateLimit,
        Self::LlmContextOverflow,
        Self::InvalidStateTransition,
    ];

    /// The short wire name of this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::ConfigurationError => "CONFIG_ERROR",
            Self::ExecutionError => "EXEC_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::MemoryError => "MEMORY_ERROR",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ToolExecutionError => "TOOL_EXEC_ERROR",
            Self::ToolParameterError => "TOOL_PARAM_ERROR",
            Self::LlmApiError => "LLM_API_ERROR",
            Self::LlmRateLimit => "LLM_RATE_LIMIT",
            Self::LlmContextOverflow => "LLM_CTX_OVERFLOW",
            Self::InvalidStateTransition => "INVALID_STATE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a diagnostic entry, ordered from least to most severe.
///
/// `Critical` is reserved for conditions that should halt the enclosing
/// session; see [`DiagnosticLog::has_critical`](crate::diagnostics::DiagnosticLog::has_critical).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational; also used for state transitions.
    Info,
    /// Something unexpected that did not stop the operation.
    Warning,
    /// The operation failed.
    #[default]
    Error,
    /// The session should stop.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Errors returned by the fallible library operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading or writing a file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The referenced session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),
}
