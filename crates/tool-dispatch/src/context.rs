//! Per-session state store.
//!
//! A [`ContextManager`] is constructed explicitly and shared (usually in an
//! `Arc`) between the agent loop and whatever else needs session state.
//! There is no process-wide instance.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::ToolResponse;
use crate::error::RuntimeError;

/// Key under which [`ContextManager::record_response`] appends results.
pub const TOOL_RESULTS_KEY: &str = "tool_results";

/// A session id and a copy of its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Session identifier.
    pub session_id: String,
    /// Session data at the time of the read.
    pub data: Map<String, Value>,
}

/// Stores mutable data per session id.
///
/// Sessions never see each other's data: every read returns a copy of one
/// session's mapping.
///
/// ```rust
/// use serde_json::{json, Map};
/// use tool_dispatch::context::ContextManager;
///
/// let contexts = ContextManager::new();
/// let session = contexts.get_or_create(None);
///
/// let mut data = Map::new();
/// data.insert("city".into(), json!("Oslo"));
/// contexts.update(&session.session_id, data);
///
/// assert_eq!(contexts.get(&session.session_id).unwrap()["city"], "Oslo");
/// ```
#[derive(Debug, Default)]
pub struct ContextManager {
    sessions: RwLock<HashMap<String, Map<String, Value>>>,
}

impl ContextManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session's data, creating an empty session if needed.
    ///
    /// With `None` a new session with a random id is always created.
    pub fn get_or_create(&self, session_id: Option<&str>) -> SessionContext {
        let session_id = session_id.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_owned);
        let mut sessions = self.sessions.write().expect("context lock poisoned");
        let data = sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                tracing::debug!(session_id = %session_id, "session created");
                Map::new()
            })
            .clone();
        SessionContext { session_id, data }
    }

    /// Returns a copy of the session's data.
    pub fn get(&self, session_id: &str) -> Option<Map<String, Value>> {
        self.sessions
            .read()
            .expect("context lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Replaces the session's whole mapping with `data`.
    ///
    /// Keys absent from `data` are dropped; no merging takes place. The
    /// session is created if it does not exist.
    pub fn update(&self, session_id: &str, data: Map<String, Value>) {
        self.sessions
            .write()
            .expect("context lock poisoned")
            .insert(session_id.to_owned(), data);
    }

    /// Removes a session. Returns whether it existed.
    pub fn delete(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .expect("context lock poisoned")
            .remove(session_id)
            .is_some();
        if removed {
            tracing::debug!(session_id, "session deleted");
        }
        removed
    }

    /// Ids of all live sessions, sorted.
    pub fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .expect("context lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Appends `response` to the session's `tool_results` array.
    ///
    /// Creates the session and the array if needed. A non-array value
    /// already stored under the key is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Serialization`] if the response cannot be
    /// encoded.
    pub fn record_response(
        &self,
        session_id: &str,
        response: &ToolResponse,
    ) -> Result<(), RuntimeError> {
        let value = serde_json::to_value(response)?;
        let mut sessions = self.sessions.write().expect("context lock poisoned");
        let data = sessions.entry(session_id.to_owned()).or_default();
        let slot = data
            .entry(TOOL_RESULTS_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value),
            other => *other = Value::Array(vec![value]),
        }
        Ok(())
    }

    /// Serializes one session as JSON.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::SessionNotFound`] if the session does not exist.
    pub fn export(&self, session_id: &str) -> Result<String, RuntimeError> {
        let data = self
            .get(session_id)
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_owned()))?;
        let session = SessionContext {
            session_id: session_id.to_owned(),
            data,
        };
        Ok(serde_json::to_string(&session)?)
    }

    /// Restores a session produced by [`export`](Self::export), replacing
    /// any existing session with the same id. Returns the session id.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Serialization`] for malformed JSON and
    /// [`RuntimeError::InvalidArgument`] for a blank session id.
    pub fn import(&self, json: &str) -> Result<String, RuntimeError> {
        let session: SessionContext = serde_json::from_str(json)?;
        if session.session_id.trim().is_empty() {
            return Err(RuntimeError::InvalidArgument(
                "session id must not be empty".into(),
            ));
        }
        self.update(&session.session_id, session.data);
        Ok(session.session_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().expect("context lock poisoned").len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
