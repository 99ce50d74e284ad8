//! Boundary with the research pipeline's streaming session.
//!
//! The state machine never touches the network. It sees the conversation
//! through the `StreamSession` trait and reacts to the `SessionUpdate`s a
//! session pushes while a run is active.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod langgraph;

// ============================================================================
// Messages
// ============================================================================

/// One conversation entry as the pipeline server represents it.
///
/// The role is called `type` on the wire. Ids are optional: the client
/// assigns one to every message it submits, but the server may deliver
/// messages without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    /// A new human message ready for submission.
    pub fn human(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: Role::Human,
            content: content.into(),
        }
    }

    /// An answer message, as the server would deliver it.
    pub fn ai(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            role: Role::Ai,
            content: content.into(),
        }
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
    System,
    Tool,
    /// Roles the server grows later; never constructed locally.
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Updates pushed by a session
// ============================================================================

/// Notifications a session pushes to the client runtime over its update
/// channel. Ordering matches the server's emission order.
#[derive(Debug)]
pub enum SessionUpdate {
    /// One raw pipeline update observed during an active run.
    Update(serde_json::Value),
    /// The session's message list changed.
    MessagesChanged,
    /// The run flag flipped.
    LoadingChanged(bool),
    /// The run ended; carries the final payload when the server sent one.
    /// Informational only: turn completion is detected from the loading
    /// flag and the message list, never from this notice.
    Finished(Option<serde_json::Value>),
    /// The stream failed; the run is over.
    Failed(SessionError),
}

// ============================================================================
// Errors
// ============================================================================

/// Transport-level failures. There is no retry policy anywhere in the
/// client: a failed run simply ends and the session reports idle.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("event stream failed: {0}")]
    Stream(String),
    #[error("malformed server payload: {0}")]
    Protocol(String),
}

impl SessionError {
    pub(crate) fn status(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status: status.as_u16(),
            message: message.into(),
        }
    }
}

// ============================================================================
// The session trait
// ============================================================================

/// A streaming session against the research pipeline server.
///
/// `submit` returns once the run has started; stage updates and message
/// changes then arrive on the update channel fixed at construction. The
/// message list is append-only from the caller's point of view while a
/// conversation is alive; only `reset` discards it.
#[async_trait]
pub trait StreamSession: Send + Sync {
    /// Begin a new turn with the given full message history.
    async fn submit(&self, messages: Vec<Message>) -> Result<(), SessionError>;

    /// Request cancellation of the active run, if any. Best-effort: the
    /// outcome is not awaited and not reported.
    async fn stop(&self);

    /// Drop all conversation state, messages and server-side thread alike.
    /// The next submit starts from scratch.
    async fn reset(&self);

    /// True while a run is active.
    fn is_loading(&self) -> bool;

    /// Current conversation as the session knows it.
    fn messages(&self) -> Vec<Message>;
}
