//! Turn lifecycle state machine for the research client.
//!
//! Pure state transitions: session callbacks and user commands become
//! `Event`s, `transition` folds them into `ClientState`, and the runtime
//! executes the returned `Effect`s.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{Event, StageEvent};
pub use state::{ClientState, SessionView, TimelineStep};
pub use transition::{transition, TransitionResult};
