//! Pure transition function for the research turn lifecycle.
//!
//! Every mutation of the timeline, the finalize latch, and the archive
//! happens here, synchronously, in reaction to one event. The function is
//! total: no input, however malformed, fails or panics. Side effects are
//! returned as data and executed by the runtime.

use tracing::debug;

use crate::session::Message;

use super::effect::Effect;
use super::event::{Event, StageEvent};
use super::state::{ClientState, SessionView};

/// Outcome of applying one event: the next state plus the effects the
/// runtime must execute, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub new_state: ClientState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    fn new(new_state: ClientState) -> Self {
        Self {
            new_state,
            effects: Vec::new(),
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Apply `event` to `state` under the given session view.
///
/// Archival is re-evaluated at the tail of every transition, so any
/// trigger that can complete a turn (a stage arrival, a loading or message
/// change) is covered without a second round-trip. Submit and cancel clear
/// the latch first, which makes the check vacuous for them.
pub fn transition(state: &ClientState, session: &SessionView, event: Event) -> TransitionResult {
    let mut result = match event {
        Event::Submit { id, text } => handle_submit(state, id, &text),
        Event::Cancel => handle_cancel(),
        Event::Stage(stage) => handle_stage(state, stage),
        Event::Sync => TransitionResult::new(state.clone()),
    };

    if let Some(effect) = try_archive(&mut result.new_state, session) {
        result.effects.push(effect);
    }
    result
}

fn handle_submit(state: &ClientState, id: String, text: &str) -> TransitionResult {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        // Blank submissions are a documented no-op, not an error.
        return TransitionResult::new(state.clone());
    }

    // Fresh turn: empty timeline, latch down. The archive persists; only
    // cancellation discards it.
    let next = ClientState {
        timeline: Vec::new(),
        finalize_pending: false,
        archive: state.archive.clone(),
    };
    TransitionResult::new(next).with_effect(Effect::SubmitTurn {
        message: Message::human(id, trimmed),
    })
}

fn handle_cancel() -> TransitionResult {
    // Stop first, then discard everything. The reset never waits on the
    // stop outcome.
    TransitionResult::new(ClientState::default())
        .with_effect(Effect::StopRun)
        .with_effect(Effect::ResetSession)
}

fn handle_stage(state: &ClientState, stage: StageEvent) -> TransitionResult {
    let mut next = state.clone();
    if stage.is_terminal() {
        next.finalize_pending = true;
    }
    match stage.to_step() {
        Some(step) => {
            next.timeline.push(step.clone());
            TransitionResult::new(next).with_effect(Effect::StepAppended { step })
        }
        None => {
            debug!("ignoring unrecognized pipeline update");
            TransitionResult::new(next)
        }
    }
}

/// Archive the live timeline when the turn-completion conditions hold:
/// the latch is up and the session shows a finished answer. Clears the
/// latch on success so an unrelated later update cannot re-trigger the
/// write. A latch with no qualifying answer stays up; archival is deferred
/// until one appears or the next submit clears it.
fn try_archive(state: &mut ClientState, session: &SessionView) -> Option<Effect> {
    if !state.finalize_pending {
        return None;
    }
    let message_id = session.answer_ready()?.to_string();
    state
        .archive
        .insert(message_id.clone(), state.timeline.clone());
    state.finalize_pending = false;
    Some(Effect::TurnArchived { message_id })
}
