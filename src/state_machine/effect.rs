//! Effects produced by transitions and executed by the client runtime.

use crate::session::Message;

use super::state::TimelineStep;

/// Side effects a transition requests. The runtime executes them in the
/// order they appear.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append the message to the session history and start a new run with
    /// the extended list.
    SubmitTurn { message: Message },
    /// Best-effort cancellation of the active run.
    StopRun,
    /// Drop all session-side conversation state.
    ResetSession,
    /// A step joined the live timeline; observers should render it.
    StepAppended { step: TimelineStep },
    /// A finished turn was archived under its answer message id.
    TurnArchived { message_id: String },
}
