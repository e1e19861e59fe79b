//! Append-only diagnostic trail.
//!
//! The log records two kinds of entries in one ordered store:
//!
//! - **errors**, tagged with a [`Severity`] and an [`ErrorCode`];
//! - **state transitions** (`tool_execution_start`, ...), always `INFO`
//!   and without a code.
//!
//! Entries are never mutated or removed. Appending never fails: a poisoned
//! lock is recovered rather than propagated, so a panicking writer cannot
//! silence every later diagnostic.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ErrorCode, Severity};

/// Discriminates error entries from state-transition markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A recorded failure or warning.
    Error,
    /// A runtime state transition.
    State,
}

/// One immutable log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEntry {
    /// Error or state marker.
    pub kind: EntryKind,
    /// Error type (`"ToolExecution"`, ...) or state name.
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Human-readable description.
    pub message: String,
    /// Severity; `Info` for state entries.
    pub severity: Severity,
    /// Classification; `None` for state entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Structured context (tool name, arguments, trace, ...).
    pub context: Map<String, Value>,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticEntry {
    /// Whether this is an error entry.
    pub fn is_error(&self) -> bool {
        self.kind == EntryKind::Error
    }
}

/// Snapshot produced by [`DiagnosticLog::report`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    /// Error entries, oldest first.
    pub errors: Vec<DiagnosticEntry>,
    /// State entries, oldest first.
    pub states: Vec<DiagnosticEntry>,
    /// Context of the most recent tool execution, if any.
    pub last_tool_execution: Option<Map<String, Value>>,
    /// Number of error entries per severity.
    pub counts_by_severity: BTreeMap<Severity, usize>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

#[derive(Default)]
struct LogState {
    entries: Vec<DiagnosticEntry>,
    last_tool_execution: Option<Map<String, Value>>,
}

/// Severity- and code-tagged record of errors and state transitions.
#[derive(Default)]
pub struct DiagnosticLog {
    state: Mutex<LogState>,
}

impl std::fmt::Debug for DiagnosticLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticLog")
            .field("entries", &self.len())
            .finish()
    }
}

impl DiagnosticLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, entry: DiagnosticEntry) {
        self.lock().entries.push(entry);
    }

    /// Appends an error entry.
    ///
    /// The entry is also emitted as a `tracing` event at the level matching
    /// `severity`.
    pub fn add_error(
        &self,
        error_type: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        code: ErrorCode,
        context: Option<Map<String, Value>>,
    ) {
        let entry_type = error_type.into();
        let message = message.into();
        match severity {
            Severity::Info => {
                tracing::info!(error_type = %entry_type, %code, "{message}");
            }
            Severity::Warning => {
                tracing::warn!(error_type = %entry_type, %code, "{message}");
            }
            Severity::Error | Severity::Critical => {
                tracing::error!(error_type = %entry_type, %code, %severity, "{message}");
            }
        }
        self.push(DiagnosticEntry {
            kind: EntryKind::Error,
            entry_type,
            message,
            severity,
            code: Some(code),
            context: context.unwrap_or_default(),
            timestamp: Utc::now(),
        });
    }

    /// Appends a state-transition marker.
    pub fn add_state(&self, state: impl Into<String>, context: Option<Map<String, Value>>) {
        let state = state.into();
        tracing::trace!(state = %state, "state transition");
        self.push(DiagnosticEntry {
            kind: EntryKind::State,
            message: format!("state transition: {state}"),
            entry_type: state,
            severity: Severity::Info,
            code: None,
            context: context.unwrap_or_default(),
            timestamp: Utc::now(),
        });
    }

    /// Error entries with the given severity, or every error entry for `None`.
    pub fn get_errors_by_severity(&self, severity: Option<Severity>) -> Vec<DiagnosticEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.is_error() && severity.is_none_or(|s| e.severity == s))
            .cloned()
            .collect()
    }

    /// Error entries with the given code.
    pub fn get_errors_by_code(&self, code: ErrorCode) -> Vec<DiagnosticEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.is_error() && e.code == Some(code))
            .cloned()
            .collect()
    }

    /// State entries, oldest first.
    pub fn get_states(&self) -> Vec<DiagnosticEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.kind == EntryKind::State)
            .cloned()
            .collect()
    }

    /// Every entry in append order.
    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.lock().entries.clone()
    }

    /// Number of entries of either kind.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Whether any `CRITICAL` error has been recorded.
    ///
    /// A critical entry means the enclosing session should stop.
    pub fn has_critical(&self) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|e| e.is_error() && e.severity == Severity::Critical)
    }

    /// Remembers the context of the most recent tool execution.
    pub fn set_last_tool_execution(&self, context: Map<String, Value>) {
        self.lock().last_tool_execution = Some(context);
    }

    /// Context passed to the last [`set_last_tool_execution`](Self::set_last_tool_execution).
    pub fn last_tool_execution(&self) -> Option<Map<String, Value>> {
        self.lock().last_tool_execution.clone()
    }

    /// Builds a full snapshot of the log.
    pub fn report(&self) -> DiagnosticReport {
        let state = self.lock();
        let (errors, states): (Vec<_>, Vec<_>) =
            state.entries.iter().cloned().partition(DiagnosticEntry::is_error);
        let mut counts_by_severity = BTreeMap::new();
        for entry in &errors {
            *counts_by_severity.entry(entry.severity).or_insert(0) += 1;
        }
        DiagnosticReport {
            errors,
            states,
            last_tool_execution: state.last_tool_execution.clone(),
            counts_by_severity,
            generated_at: Utc::now(),
        }
    }
}
