//! State types for the research turn lifecycle.

use std::collections::HashMap;

use crate::session::{Message, Role};

/// One human-readable entry in the research timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineStep {
    pub title: String,
    pub data: String,
}

impl TimelineStep {
    pub fn new(title: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            data: data.into(),
        }
    }
}

/// Everything the client owns: the live timeline for the in-flight turn,
/// the finalize latch, and the archive of completed turns.
///
/// `Default` is the freshly initialized client; cancellation resets to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientState {
    /// Steps classified so far for the current turn, in arrival order.
    /// Append-only during a turn; replaced wholesale at the next submit.
    pub timeline: Vec<TimelineStep>,
    /// Set when the terminal pipeline stage has been observed for the
    /// current turn; cleared on submit and after a successful archival.
    pub finalize_pending: bool,
    /// Frozen timeline snapshots keyed by the answer message id. Survives
    /// submits; discarded only by cancellation.
    pub archive: HashMap<String, Vec<TimelineStep>>,
}

impl ClientState {
    /// Archived timeline for a completed turn, if one was recorded.
    pub fn archived(&self, message_id: &str) -> Option<&[TimelineStep]> {
        self.archive.get(message_id).map(Vec::as_slice)
    }
}

/// The session facts a transition may consult, captured immediately before
/// each event is applied.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    pub is_loading: bool,
    pub last_message: Option<Message>,
}

impl SessionView {
    pub fn new(is_loading: bool, last_message: Option<Message>) -> Self {
        Self {
            is_loading,
            last_message,
        }
    }

    /// The id of the finished answer, when this view shows one: the run is
    /// idle and the most recent message is an `ai` message with an id.
    ///
    /// Deliberately the only place the "last message is the answer"
    /// heuristic lives. If the server ever grows an explicit completion
    /// signal, swap it in here.
    pub fn answer_ready(&self) -> Option<&str> {
        if self.is_loading {
            return None;
        }
        self.last_message
            .as_ref()
            .filter(|message| message.role == Role::Ai)
            .and_then(|message| message.id.as_deref())
    }
}
